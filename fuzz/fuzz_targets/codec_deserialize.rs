#![no_main]
use faultline_model::{
    ComponentGraph, FieldFlags, IntRange, ObjectId, SerializationMode, StateCodec, StateVisitor,
    Stateful,
};
use libfuzzer_sys::fuzz_target;

#[derive(Clone, Debug)]
struct Valve {
    open: bool,
    // Five values need three bits, so some encodings are out of range.
    pressure: i64,
    mode: u32,
    flags: [bool; 3],
    stages: [u32; 2],
    peer: Option<ObjectId>,
    bypass: [Option<ObjectId>; 2],
}

impl Stateful for Valve {
    fn visit(&mut self, v: &mut dyn StateVisitor) {
        v.bool("open", &mut self.open);
        v.int("pressure", &mut self.pressure, IntRange::new(-2, 2));
        v.visit_variant("mode", &mut self.mode, 3, FieldFlags::NONE);
        v.visit_bool_array("flags", &mut self.flags, FieldFlags::NONE);
        v.visit_variant_array("stages", &mut self.stages, 3, FieldFlags::NONE);
        v.visit_ref("peer", &mut self.peer, FieldFlags::NONE);
        v.visit_ref_array("bypass", &mut self.bypass, FieldFlags::NONE);
    }
}

fn valve() -> Valve {
    Valve {
        open: false,
        pressure: 0,
        mode: 0,
        flags: [false; 3],
        stages: [0; 2],
        peer: None,
        bypass: [None; 2],
    }
}

fn setup() -> (ComponentGraph, StateCodec) {
    let mut graph = ComponentGraph::new();
    let first = graph.insert_root(valve());
    let second = graph.insert(valve());
    let third = graph.insert(valve());
    graph.get_mut(first).peer = Some(second.id());
    graph.get_mut(second).bypass = [Some(third.id()), None];
    let codec = StateCodec::new(&mut graph, 4, SerializationMode::Optimized)
        .expect("valid fuzz model");
    (graph, codec)
}

fuzz_target!(|data: &[u8]| {
    let (mut graph, codec) = setup();
    let mut bytes = data.to_vec();
    bytes.resize(codec.size(), 0);

    // Arbitrary bytes either decode or fail cleanly; decoded states
    // re-encode to a fixed point.
    if let Ok(header) = codec.deserialize(&mut graph, &bytes) {
        let encoded = codec.encode(&mut graph, header).expect("decoded state re-encodes");
        codec
            .deserialize(&mut graph, &encoded)
            .expect("encoded state decodes");
        let again = codec.encode(&mut graph, header).expect("decoded state re-encodes");
        assert_eq!(encoded, again);
    }
    let _ = codec.deserialize(&mut graph, data);
});
