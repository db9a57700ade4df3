//! Round trip of arbitrary in-range graphs through the state codec.

use faultline_model::{
    CodecError, ComponentGraph, ConstructionError, FieldFlags, Handle, IntRange, ObjectId,
    ObjectTable, SerializationMode, StateCodec, StateVisitor, Stateful, Variant,
};
use proptest::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    Idle,
    Running,
    Degraded,
    Failed,
    Recovering,
}

impl Variant for Phase {
    const COUNT: u32 = 5;

    fn index(self) -> u32 {
        self as u32
    }

    fn from_index(index: u32) -> Self {
        match index {
            0 => Phase::Idle,
            1 => Phase::Running,
            2 => Phase::Degraded,
            3 => Phase::Failed,
            _ => Phase::Recovering,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Pump {
    phase: Phase,
    pressure: i64,
    flags: [bool; 4],
    buffer: [i64; 5],
    stages: [Phase; 3],
    partner: Option<ObjectId>,
    backups: [Option<ObjectId>; 2],
    hidden_counter: i64,
}

impl Stateful for Pump {
    fn visit(&mut self, v: &mut dyn StateVisitor) {
        v.variant("phase", &mut self.phase, FieldFlags::NONE);
        v.int("pressure", &mut self.pressure, IntRange::new(-100, 27));
        v.visit_bool_array("flags", &mut self.flags, FieldFlags::NONE);
        v.visit_int_array("buffer", &mut self.buffer, IntRange::new(3, 6), FieldFlags::NONE);
        v.variants("stages", &mut self.stages, FieldFlags::NONE);
        v.visit_ref("partner", &mut self.partner, FieldFlags::NONE);
        v.visit_ref_array("backups", &mut self.backups, FieldFlags::NONE);
        v.visit_int(
            "hidden_counter",
            &mut self.hidden_counter,
            IntRange::new(0, 1000),
            FieldFlags::HIDDEN,
        );
    }
}

fn pump() -> Pump {
    Pump {
        phase: Phase::Idle,
        pressure: 0,
        flags: [false; 4],
        buffer: [3; 5],
        stages: [Phase::Idle; 3],
        partner: None,
        backups: [None; 2],
        hidden_counter: 0,
    }
}

fn graph() -> (ComponentGraph, Vec<Handle<Pump>>) {
    let mut graph = ComponentGraph::new();
    let a = graph.insert_root(pump());
    let b = graph.insert(pump());
    let c = graph.insert(pump());
    graph.get_mut(a).partner = Some(b.id());
    graph.get_mut(b).partner = Some(c.id());
    (graph, vec![a, b, c])
}

fn arb_pump(objects: usize) -> impl Strategy<Value = Pump> {
    (
        0u32..Phase::COUNT,
        -100i64..=27,
        any::<[bool; 4]>(),
        proptest::array::uniform5(3i64..=6),
        proptest::array::uniform3(0u32..Phase::COUNT),
        proptest::option::of(0..objects),
        proptest::array::uniform2(proptest::option::of(0..objects)),
        0i64..=1000,
    )
        .prop_map(
            |(phase, pressure, flags, buffer, stages, partner, backups, hidden_counter)| Pump {
                phase: Phase::from_index(phase),
                pressure,
                flags,
                buffer,
                stages: stages.map(Phase::from_index),
                partner: partner.map(ObjectId::from_index),
                backups: backups.map(|b| b.map(ObjectId::from_index)),
                hidden_counter,
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn codec_round_trip_is_exact(
        pumps in proptest::collection::vec(arb_pump(3), 3),
        header in 0u64..(1 << 5),
    ) {
        let (mut source, handles) = graph();
        let codec = StateCodec::new(&mut source, 5, SerializationMode::Optimized).unwrap();
        for (handle, pump) in handles.iter().zip(&pumps) {
            *source.get_mut(*handle) = pump.clone();
        }

        let bytes = codec.encode(&mut source, header).unwrap();
        prop_assert_eq!(bytes.len(), codec.size());

        let (mut target, _) = graph();
        let decoded_header = codec.deserialize(&mut target, &bytes).unwrap();
        prop_assert_eq!(decoded_header, header);
        for handle in &handles {
            let mut expected = source.get(*handle).clone();
            expected.hidden_counter = 0;
            prop_assert_eq!(target.get(*handle), &expected);
        }
        prop_assert_eq!(codec.encode(&mut target, decoded_header).unwrap(), bytes);
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..24)) {
        let (mut target, _) = graph();
        let codec = StateCodec::new(&mut target, 5, SerializationMode::Optimized).unwrap();
        if let Ok(header) = codec.deserialize(&mut target, &bytes) {
            let again = codec.encode(&mut target, header).unwrap();
            prop_assert_eq!(again.len(), bytes.len());
        }
    }
}

#[test]
fn reference_arrays_reach_objects() {
    let mut graph = ComponentGraph::new();
    let hub = graph.insert_root(pump());
    let left = graph.insert(pump());
    let right = graph.insert(pump());
    graph.insert(pump());
    graph.get_mut(hub).backups = [Some(right.id()), Some(left.id())];

    let table = ObjectTable::build(&mut graph).unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.slot_of(right.id()), Some(1));
    assert_eq!(table.slot_of(left.id()), Some(2));

    graph.get_mut(hub).backups[1] = Some(ObjectId::from_index(40));
    assert!(matches!(
        ObjectTable::build(&mut graph),
        Err(ConstructionError::DanglingReference { field: "backups", .. })
    ));
}

#[test]
fn reference_arrays_dump_slots() {
    let (mut graph, handles) = graph();
    let codec = StateCodec::new(&mut graph, 0, SerializationMode::Full).unwrap();
    graph.get_mut(handles[0]).backups = [None, Some(handles[2].id())];
    graph.get_mut(handles[0]).stages = [Phase::Running, Phase::Failed, Phase::Idle];

    let dumps = codec.dump(&mut graph).unwrap();
    let field = |name: &str| {
        dumps[0]
            .fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.clone())
    };
    assert_eq!(field("backups").as_deref(), Some("[null, @2]"));
    assert_eq!(field("stages").as_deref(), Some("[1/5, 3/5, 0/5]"));
}

#[test]
fn out_of_range_array_elements_are_rejected() {
    let (mut graph, handles) = graph();
    let codec = StateCodec::new(&mut graph, 5, SerializationMode::Optimized).unwrap();
    // All ones decodes every phase to 7, beyond the five declared.
    let bytes = vec![0xff; codec.size()];
    assert!(matches!(
        codec.deserialize(&mut graph, &bytes),
        Err(CodecError::CorruptState { .. })
    ));

    graph.get_mut(handles[1]).backups[0] = Some(ObjectId::from_index(40));
    assert!(matches!(
        codec.encode(&mut graph, 0),
        Err(CodecError::UnknownReference { field: "backups", .. })
    ));
}
