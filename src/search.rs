use crate::error::{TfError, TfResult};
use crate::registry::{FrameGraph, FrameHandle};
use crate::time::TfTime;
use crate::transform::TransformStorage;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Edge samples along a found path, split at the meeting frame: `inverse`
/// walks from the source up to the meeting frame, `forward` from the meeting
/// frame down to the target. Each entry is the edge's best sample at the
/// queried instant.
#[derive(Debug, Default)]
pub struct SearchPath {
    pub inverse: Vec<TransformStorage>,
    pub forward: Vec<TransformStorage>,
}

/// One frontier entry. The two parentage slots record from which direction
/// the frame has been reached: `back_step` links toward the source,
/// `fwd_step` toward the target. A node holding both is a meeting point.
#[derive(Clone, Copy)]
struct SearchNode {
    frame: FrameHandle,
    cost: i64,
    back_step: Option<usize>,
    fwd_step: Option<usize>,
}

/// Bidirectional best-first search over the frame graph.
///
/// Both frontiers share one min-queue ordered by path cost, where the cost
/// of a path is the largest `time_to_nearest` over its edges: the returned
/// path is the one needing the least inter-/extrapolation on its worst edge.
/// Equal costs pop in insertion order. Expansion follows child→parent edges
/// only, mirroring how edges are recorded; a frame reached from both
/// directions is re-queued as a dedicated meeting node so that each
/// frontier's own traversal through that frame stays expandable.
pub fn lookup_path(
    graph: &FrameGraph,
    source: FrameHandle,
    target: FrameHandle,
    time: TfTime,
) -> TfResult<SearchPath> {
    if source == target {
        return Ok(SearchPath::default());
    }

    let mut nodes: Vec<SearchNode> = Vec::new();
    let mut visited: HashMap<FrameHandle, usize> = HashMap::new();
    let mut queue: BinaryHeap<Reverse<(i64, u64, usize)>> = BinaryHeap::new();
    let mut seq: u64 = 0;

    let push = |queue: &mut BinaryHeap<Reverse<(i64, u64, usize)>>,
                    seq: &mut u64,
                    cost: i64,
                    index: usize| {
        queue.push(Reverse((cost, *seq, index)));
        *seq += 1;
    };

    let source_index = nodes.len();
    nodes.push(SearchNode {
        frame: source,
        cost: 0,
        back_step: Some(source_index),
        fwd_step: None,
    });
    visited.insert(source, source_index);
    push(&mut queue, &mut seq, 0, source_index);

    let target_index = nodes.len();
    nodes.push(SearchNode {
        frame: target,
        cost: 0,
        back_step: None,
        fwd_step: Some(target_index),
    });
    visited.insert(target, target_index);
    push(&mut queue, &mut seq, 0, target_index);

    while let Some(Reverse((_, _, index))) = queue.pop() {
        let node = nodes[index];

        if node.back_step.is_some() && node.fwd_step.is_some() {
            return reconstruct(graph, &nodes, index, source, target, time);
        }

        let parents: Vec<FrameHandle> = graph.parent_frames(node.frame).collect();
        for parent in parents {
            // an edge without samples cannot contribute data
            let Some(cache) = graph.edge_cache(parent, node.frame) else {
                continue;
            };
            let Some(edge_cost) = cache
                .read()
                .expect("edge cache lock poisoned")
                .time_to_nearest(time)
            else {
                continue;
            };

            match visited.get(&parent).copied() {
                None => {
                    let next_index = nodes.len();
                    nodes.push(SearchNode {
                        frame: parent,
                        cost: edge_cost.max(node.cost),
                        back_step: node.back_step.map(|_| index),
                        fwd_step: node.fwd_step.map(|_| index),
                    });
                    visited.insert(parent, next_index);
                    push(&mut queue, &mut seq, nodes[next_index].cost, next_index);
                }
                Some(prior_index) => {
                    let prior = nodes[prior_index];
                    let opposite = (prior.back_step.is_none() && node.fwd_step.is_none())
                        || (prior.fwd_step.is_none() && node.back_step.is_none());
                    if !opposite {
                        continue;
                    }
                    // met from the other direction: fork a meeting node and
                    // leave the prior node queued for its own side
                    let mut meet = prior;
                    meet.cost = edge_cost.max(meet.cost.max(node.cost));
                    if node.back_step.is_some() {
                        meet.back_step = Some(index);
                    }
                    if node.fwd_step.is_some() {
                        meet.fwd_step = Some(index);
                    }
                    let meet_index = nodes.len();
                    nodes.push(meet);
                    push(&mut queue, &mut seq, meet.cost, meet_index);
                }
            }
        }
    }

    Err(TfError::NotConnected {
        from_frame: frame_name(graph, source),
        target: frame_name(graph, target),
    })
}

/// Walks both parentage chains out of the meeting node, collecting each
/// edge's sample at `time`.
fn reconstruct(
    graph: &FrameGraph,
    nodes: &[SearchNode],
    meeting: usize,
    source: FrameHandle,
    target: FrameHandle,
    time: TfTime,
) -> TfResult<SearchPath> {
    let mut path = SearchPath::default();

    let mut index = meeting;
    while nodes[index].frame != source {
        let step = nodes[index]
            .back_step
            .expect("source chain is fully linked");
        path.inverse
            .push(edge_sample(graph, nodes[index].frame, nodes[step].frame, time)?);
        index = step;
    }

    index = meeting;
    while nodes[index].frame != target {
        let step = nodes[index].fwd_step.expect("target chain is fully linked");
        path.forward
            .push(edge_sample(graph, nodes[index].frame, nodes[step].frame, time)?);
        index = step;
    }

    Ok(path)
}

fn edge_sample(
    graph: &FrameGraph,
    parent: FrameHandle,
    child: FrameHandle,
    time: TfTime,
) -> TfResult<TransformStorage> {
    graph
        .edge_cache(parent, child)
        .and_then(|cache| {
            cache
                .read()
                .expect("edge cache lock poisoned")
                .get_data(time)
        })
        .ok_or_else(|| TfError::NoData(frame_name(graph, child)))
}

fn frame_name(graph: &FrameGraph, handle: FrameHandle) -> String {
    graph.frame_id(handle).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FrameRegistry;
    use crate::time::NANOS_PER_SEC;
    use nalgebra::{UnitQuaternion, Vector3};

    fn insert(reg: &FrameRegistry, parent: &str, child: &str, stamp_secs: i64, x: f64) {
        let parent = reg.resolve_or_insert(parent);
        let child = reg.resolve_or_insert(child);
        assert!(reg.insert(TransformStorage {
            translation: Vector3::new(x, 0.0, 0.0),
            rotation: UnitQuaternion::identity(),
            stamp: TfTime::from_secs(stamp_secs),
            parent,
            child,
        }));
    }

    fn registry() -> FrameRegistry {
        FrameRegistry::new(3600 * NANOS_PER_SEC, "")
    }

    #[test]
    fn test_single_edge_path() {
        let reg = registry();
        insert(&reg, "/map", "/base", 10, 1.0);

        let graph = reg.graph();
        let source = graph.get("/base").unwrap();
        let target = graph.get("/map").unwrap();
        let path = lookup_path(&graph, source, target, TfTime::from_secs(10)).unwrap();

        assert_eq!(path.inverse.len(), 1);
        assert!(path.forward.is_empty());
        assert_eq!(path.inverse[0].parent, target);
        assert_eq!(path.inverse[0].child, source);
    }

    #[test]
    fn test_chain_path_orders_edges() {
        let reg = registry();
        insert(&reg, "/map", "/odom", 10, 1.0);
        insert(&reg, "/odom", "/base", 10, 2.0);

        let graph = reg.graph();
        let base = graph.get("/base").unwrap();
        let map = graph.get("/map").unwrap();
        let odom = graph.get("/odom").unwrap();

        // climb from /base: the inverse leg lists the meet-side edge first
        let path = lookup_path(&graph, base, map, TfTime::from_secs(10)).unwrap();
        assert_eq!(path.inverse.len(), 2);
        assert!(path.forward.is_empty());
        assert_eq!(path.inverse[0].parent, map);
        assert_eq!(path.inverse[0].child, odom);
        assert_eq!(path.inverse[1].parent, odom);
        assert_eq!(path.inverse[1].child, base);

        // opposite query direction lands everything on the forward leg
        let path = lookup_path(&graph, map, base, TfTime::from_secs(10)).unwrap();
        assert!(path.inverse.is_empty());
        assert_eq!(path.forward.len(), 2);
        assert_eq!(path.forward[0].parent, map);
        assert_eq!(path.forward[0].child, odom);
    }

    #[test]
    fn test_meeting_in_the_middle() {
        let reg = registry();
        insert(&reg, "/x", "/a", 10, 1.0);
        insert(&reg, "/x", "/b", 10, 2.0);

        let graph = reg.graph();
        let a = graph.get("/a").unwrap();
        let b = graph.get("/b").unwrap();
        let x = graph.get("/x").unwrap();
        let path = lookup_path(&graph, a, b, TfTime::from_secs(10)).unwrap();

        assert_eq!(path.inverse.len(), 1);
        assert_eq!(path.forward.len(), 1);
        assert_eq!(path.inverse[0].parent, x);
        assert_eq!(path.inverse[0].child, a);
        assert_eq!(path.forward[0].parent, x);
        assert_eq!(path.forward[0].child, b);
    }

    #[test]
    fn test_prefers_temporally_closer_route() {
        let reg = registry();
        // two candidate meeting frames; /x has samples at the query time,
        // /y is one second off on both edges
        insert(&reg, "/x", "/a", 10, 1.0);
        insert(&reg, "/x", "/b", 10, 2.0);
        insert(&reg, "/y", "/a", 11, 3.0);
        insert(&reg, "/y", "/b", 11, 4.0);

        let graph = reg.graph();
        let a = graph.get("/a").unwrap();
        let b = graph.get("/b").unwrap();
        let x = graph.get("/x").unwrap();
        let path = lookup_path(&graph, a, b, TfTime::from_secs(10)).unwrap();

        assert_eq!(path.inverse.len(), 1);
        assert_eq!(path.forward.len(), 1);
        assert_eq!(path.inverse[0].parent, x);
        assert_eq!(path.forward[0].parent, x);
    }

    #[test]
    fn test_minimax_beats_shorter_worse_path() {
        let reg = registry();
        // direct edge is 5s away from the query instant; the two-edge route
        // through /via is never more than 1s off
        insert(&reg, "/goal", "/start", 15, 1.0);
        insert(&reg, "/via", "/start", 11, 2.0);
        insert(&reg, "/goal", "/via", 11, 3.0);

        let graph = reg.graph();
        let start = graph.get("/start").unwrap();
        let goal = graph.get("/goal").unwrap();
        let via = graph.get("/via").unwrap();
        let path = lookup_path(&graph, start, goal, TfTime::from_secs(10)).unwrap();

        let worst = path
            .inverse
            .iter()
            .chain(path.forward.iter())
            .map(|s| s.stamp.abs_diff(TfTime::from_secs(10)))
            .max()
            .unwrap();
        assert!(worst <= NANOS_PER_SEC);
        assert_eq!(path.inverse.len() + path.forward.len(), 2);
        assert!(path
            .inverse
            .iter()
            .chain(path.forward.iter())
            .any(|s| s.parent == via || s.child == via));
    }

    #[test]
    fn test_disconnected_graphs() {
        let reg = registry();
        insert(&reg, "/map", "/base", 10, 1.0);
        insert(&reg, "/island", "/rock", 10, 1.0);

        let graph = reg.graph();
        let base = graph.get("/base").unwrap();
        let rock = graph.get("/rock").unwrap();
        let err = lookup_path(&graph, base, rock, TfTime::from_secs(10)).unwrap_err();
        assert!(matches!(err, TfError::NotConnected { .. }));
    }

    #[test]
    fn test_identical_endpoints_short_circuit() {
        let reg = registry();
        insert(&reg, "/map", "/base", 10, 1.0);
        let graph = reg.graph();
        let base = graph.get("/base").unwrap();
        let path = lookup_path(&graph, base, base, TfTime::from_secs(10)).unwrap();
        assert!(path.inverse.is_empty());
        assert!(path.forward.is_empty());
    }
}
