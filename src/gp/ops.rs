//! Genetic operators over expression trees.
//!
//! Both operators exchange whole subtrees beneath an operator node. Neither one ever touches the
//! root itself, so an expression rooted at an operator remains rooted at an operator.

use super::expr::{self, Expr, NodeIndex, PrimitiveSet, Side};
use crate::error::Error;
use rand::seq::SliceRandom;
use rand::Rng;

/// The four ways in which the inputs of two operator nodes may be paired for an exchange.
pub const SIDE_PAIRINGS: [(Side, Side); 4] = [
    (Side::Right, Side::Left),
    (Side::Left, Side::Right),
    (Side::Left, Side::Left),
    (Side::Right, Side::Right),
];

/// Choose an operator node uniformly at random.
///
/// Returns `None` for an expression that is a lone terminal.
pub fn select_internal_node<R>(rng: &mut R, expr: &Expr) -> Option<NodeIndex>
where
    R: Rng,
{
    expr.internal_nodes().choose(rng).cloned()
}

fn child_or_malformed(expr: &Expr, nx: NodeIndex, side: Side) -> Result<NodeIndex, Error> {
    expr.child(nx, side).ok_or(Error::MalformedTree {
        node: nx.index(),
        reason: "operator is missing an operand",
    })
}

/// Exchange a random subtree of `a` with a random subtree of `b`.
///
/// The inputs are left untouched; the two offspring are returned instead. Returns `None` when
/// either expression has no operator node to exchange beneath.
pub fn crossover<R>(rng: &mut R, a: &Expr, b: &Expr) -> Result<Option<(Expr, Expr)>, Error>
where
    R: Rng,
{
    let (a_parent, b_parent) = match (select_internal_node(rng, a), select_internal_node(rng, b)) {
        (Some(a_parent), Some(b_parent)) => (a_parent, b_parent),
        _ => return Ok(None),
    };
    let (a_side, b_side) = SIDE_PAIRINGS[rng.gen_range(0..SIDE_PAIRINGS.len())];
    let a_child = child_or_malformed(a, a_parent, a_side)?;
    let b_child = child_or_malformed(b, b_parent, b_side)?;
    let a_subtree = a.clone_subtree(a_child);
    let b_subtree = b.clone_subtree(b_child);
    Ok(Some((a.replace_subtree(a_child, &b_subtree), b.replace_subtree(b_child, &a_subtree))))
}

/// Repeat `crossover` until both offspring fit within their depth budgets.
///
/// Gives up after `max_attempts` draws, returning `None`.
pub fn crossover_within_budget<R>(
    rng: &mut R,
    (a, a_max_depth): (&Expr, u32),
    (b, b_max_depth): (&Expr, u32),
    max_attempts: usize,
) -> Result<Option<(Expr, Expr)>, Error>
where
    R: Rng,
{
    for _ in 0..max_attempts {
        match crossover(rng, a, b)? {
            None => return Ok(None),
            Some((a_new, b_new)) => {
                if a_new.depth() <= a_max_depth && b_new.depth() <= b_max_depth {
                    return Ok(Some((a_new, b_new)));
                }
            }
        }
    }
    Ok(None)
}

/// Replace one input of a random operator node with a freshly generated subtree.
///
/// The replacement is generated with a budget of `max_depth - depth(target) + 1`, so the result
/// never exceeds `max_depth`. A lone terminal is regenerated in full.
pub fn mutate<R>(
    rng: &mut R,
    primitives: &PrimitiveSet,
    target: &mut Expr,
    max_depth: u32,
) -> Result<(), Error>
where
    R: Rng,
{
    let mutated = match select_internal_node(rng, target) {
        None => expr::gen(rng, primitives, max_depth),
        Some(parent) => {
            let side = if rng.gen_bool(0.5) { Side::Left } else { Side::Right };
            let child = child_or_malformed(target, parent, side)?;
            let budget = (max_depth + 1).saturating_sub(target.node(child).depth).max(1);
            let subtree = expr::gen(rng, primitives, budget);
            target.replace_subtree(child, &subtree)
        }
    };
    let depth = mutated.depth();
    if depth > max_depth.max(1) {
        return Err(Error::DepthBudgetExceeded { depth, max_depth });
    }
    *target = mutated;
    Ok(())
}
