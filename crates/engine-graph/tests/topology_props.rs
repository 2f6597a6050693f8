use engine_graph::{
    GraphConfig, InputChannel, Module, ModuleClass, ModuleId, ProcessContext, SignalGraph,
    Topology, Transaction,
};
use proptest::prelude::*;

struct Node;

impl Module for Node {
    fn class(&self) -> ModuleClass {
        ModuleClass::new(2, 1, 2)
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let value = ctx.inputs.istream(0).first().copied().unwrap_or_default();
        ctx.outputs.ostream(0).fill(value);
        ctx.outputs.ostream(1).fill(-value);
    }
}

#[derive(Debug, Clone)]
enum Op {
    Connect(usize, usize, usize, bool, usize),
    Disconnect(usize, usize, usize, bool, usize),
    Consumer(usize, bool),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..6usize, 0..3usize, 0..6usize, any::<bool>(), 0..3usize)
            .prop_map(|(s, o, d, j, c)| Op::Connect(s, o, d, j, c)),
        (0..6usize, 0..3usize, 0..6usize, any::<bool>(), 0..3usize)
            .prop_map(|(s, o, d, j, c)| Op::Disconnect(s, o, d, j, c)),
        (0..6usize, any::<bool>()).prop_map(|(m, c)| Op::Consumer(m, c)),
    ]
}

fn channel(joint: bool, index: usize) -> InputChannel {
    if joint {
        InputChannel::Joint(index)
    } else {
        InputChannel::Stream(index)
    }
}

proptest! {
    #[test]
    fn mirror_and_graph_agree(ops in prop::collection::vec(prop::collection::vec(op(), 1..4), 1..24)) {
        let mut topology = Topology::new();
        let mut graph = SignalGraph::new(GraphConfig::new(48_000, 8));
        let mut setup = Transaction::new();
        let ids: Vec<ModuleId> = (0..6).map(|_| setup.integrate(Node)).collect();
        topology.commit(&setup).unwrap();
        graph.apply(&mut setup).unwrap();

        for batch in ops {
            let mut txn = Transaction::new();
            for op in batch {
                match op {
                    Op::Connect(s, o, d, j, c) => txn.connect(ids[s], o, ids[d], channel(j, c)),
                    Op::Disconnect(s, o, d, j, c) => txn.disconnect(ids[s], o, ids[d], channel(j, c)),
                    Op::Consumer(m, c) => txn.set_consumer(ids[m], c),
                }
            }
            if topology.commit(&txn).is_ok() {
                graph.apply(&mut txn).unwrap();
            }
            let scheduled = graph.schedule();
            let mut unique = scheduled.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(unique.len(), scheduled.len());
            for id in &ids {
                prop_assert!(!topology.is_consumer(*id) || scheduled.contains(id));
            }
        }
        prop_assert_eq!(topology.len(), graph.len());
    }
}
