//! Iterative Tarjan strongly connected components.

use crate::virtual_machine::stack_item::ObjectId;
use std::collections::{BTreeMap, BTreeSet};

struct Frame {
    node: ObjectId,
    successors: Vec<ObjectId>,
    next: usize,
}

/// Computes the strongly connected components reachable from `roots`.
///
/// Components are returned in reverse topological order of the successor relation: a
/// component always comes after every component reachable from it. The traversal keeps an
/// explicit frame stack so deep object graphs cannot exhaust the native stack.
pub(crate) fn strongly_connected_components<F>(
    roots: &[ObjectId],
    mut successors: F,
) -> Vec<Vec<ObjectId>>
where
    F: FnMut(ObjectId) -> Vec<ObjectId>,
{
    let mut index: BTreeMap<ObjectId, usize> = BTreeMap::new();
    let mut low_link: BTreeMap<ObjectId, usize> = BTreeMap::new();
    let mut on_stack: BTreeSet<ObjectId> = BTreeSet::new();
    let mut stack: Vec<ObjectId> = Vec::new();
    let mut components = Vec::new();

    for &root in roots {
        if index.contains_key(&root) {
            continue;
        }

        let mut frames = vec![visit(
            root,
            &mut index,
            &mut low_link,
            &mut on_stack,
            &mut stack,
            &mut successors,
        )];

        while let Some(frame) = frames.last_mut() {
            let v = frame.node;
            if frame.next < frame.successors.len() {
                let w = frame.successors[frame.next];
                frame.next += 1;

                if let Some(&w_index) = index.get(&w) {
                    if on_stack.contains(&w) {
                        let low = low_link[&v].min(w_index);
                        low_link.insert(v, low);
                    }
                } else {
                    let child = visit(
                        w,
                        &mut index,
                        &mut low_link,
                        &mut on_stack,
                        &mut stack,
                        &mut successors,
                    );
                    frames.push(child);
                }
                continue;
            }

            frames.pop();
            let v_low = low_link[&v];
            if let Some(parent) = frames.last() {
                let low = low_link[&parent.node].min(v_low);
                low_link.insert(parent.node, low);
            }

            if v_low == index[&v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack.remove(&w);
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }

    components
}

fn visit<F>(
    node: ObjectId,
    index: &mut BTreeMap<ObjectId, usize>,
    low_link: &mut BTreeMap<ObjectId, usize>,
    on_stack: &mut BTreeSet<ObjectId>,
    stack: &mut Vec<ObjectId>,
    successors: &mut F,
) -> Frame
where
    F: FnMut(ObjectId) -> Vec<ObjectId>,
{
    let next_index = index.len();
    index.insert(node, next_index);
    low_link.insert(node, next_index);
    on_stack.insert(node);
    stack.push(node);
    Frame {
        node,
        successors: successors(node),
        next: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> ObjectId {
        ObjectId(n)
    }

    #[test]
    fn finds_cycles_and_orders_successors_first() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let graph = |n: ObjectId| match n.0 {
            0 => vec![id(1)],
            1 => vec![id(2)],
            2 => vec![id(1), id(3)],
            _ => vec![],
        };
        let components = strongly_connected_components(&[id(0)], graph);
        assert_eq!(components.len(), 3);
        assert_eq!(components[0], vec![id(3)]);
        let mut cycle = components[1].clone();
        cycle.sort();
        assert_eq!(cycle, vec![id(1), id(2)]);
        assert_eq!(components[2], vec![id(0)]);
    }

    #[test]
    fn self_loop_is_one_component() {
        let components = strongly_connected_components(&[id(7)], |_| vec![id(7)]);
        assert_eq!(components, vec![vec![id(7)]]);
    }

    #[test]
    fn deep_chain_does_not_recurse() {
        let depth = 100_000;
        let components = strongly_connected_components(&[id(0)], |n: ObjectId| {
            if n.0 + 1 < depth { vec![id(n.0 + 1)] } else { vec![] }
        });
        assert_eq!(components.len(), depth);
    }
}
