use nxtree_core::{ArrayData, ElementType, NodeKind, Value, DATASET_CLASS, ENTRY_CLASS};
use nxtree_io::{
    CompressionPolicy, Error, MemoryApi, NexusApi, NexusWriter, Op, WriterConfig,
};

fn writer() -> NexusWriter<MemoryApi> {
    NexusWriter::with_api(MemoryApi::new(), WriterConfig::default()).unwrap()
}

fn writer_with(api: MemoryApi, config: WriterConfig) -> NexusWriter<MemoryApi> {
    NexusWriter::with_api(api, config).unwrap()
}

#[test]
fn test_entry_with_detector() {
    let mut w = writer();
    let root = w.root();
    let entry = w.create_child(root, "entry1", ENTRY_CLASS).unwrap();
    let det = w.create_child(entry, "det1", "NXdetector").unwrap();
    let values: Vec<f32> = (0..9u8).map(|i| f32::from(i) * 0.5).collect();
    w.set_value(det, ElementType::Float32, &[9], values.clone())
        .unwrap();

    w.write(root).unwrap();

    assert_eq!(w.error_message(root).unwrap(), "");
    let api = w.api();
    assert_eq!(api.open_depth(), 0);
    assert_eq!(api.object("/entry1").unwrap().class_name(), ENTRY_CLASS);
    let det1 = api.object("/entry1/det1").unwrap();
    assert_eq!(det1.kind(), NodeKind::Dataset);
    assert_eq!(det1.shape(), &[9]);
    assert_eq!(
        det1.attribute("NX_class").and_then(Value::as_text),
        Some("NXdetector")
    );
    let Some(ArrayData::Float32(stored)) = det1.data() else {
        panic!("expected float32 data");
    };
    for (a, b) in stored.iter().zip(&values) {
        approx::assert_relative_eq!(*a, *b);
    }
    assert!(w.node(det).unwrap().is_committed());
    assert_eq!(w.entry_count(), 1);
}

#[test]
fn test_round_trip_whole_write() {
    let mut w = writer();
    let root = w.root();
    let entry = w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    let counts = w.create_child(entry, "counts", DATASET_CLASS).unwrap();
    let values: Vec<i32> = (0..12).collect();
    w.set_value(counts, ElementType::Int32, &[3, 4], values.clone())
        .unwrap();

    w.write(root).unwrap();

    let api = w.api();
    let object = api.object("/entry/counts").unwrap();
    assert_eq!(object.shape(), &[3, 4]);
    assert_eq!(object.data(), Some(&ArrayData::Int32(values)));
    assert_eq!(api.calls(Op::PutData), 1);
    assert_eq!(api.calls(Op::PutSlab), 0);
}

#[test]
fn test_round_trip_slabbed_write() {
    let config = WriterConfig::default().with_slab_budget(101);
    let mut w = writer_with(MemoryApi::new(), config);
    let root = w.root();
    let counts = w.create_child(root, "counts", DATASET_CLASS).unwrap();
    let values: Vec<i32> = (0..240).collect();
    w.set_value(counts, ElementType::Int32, &[60, 4], values.clone())
        .unwrap();

    w.write(counts).unwrap();

    assert_eq!(w.error_message(counts).unwrap(), "");
    let api = w.api();
    assert_eq!(api.calls(Op::PutData), 0);
    assert_eq!(api.calls(Op::PutSlab), 3);
    assert_eq!(
        api.object("/counts").unwrap().data(),
        Some(&ArrayData::Int32(values))
    );
}

#[test]
fn test_degenerate_dimensions_dropped() {
    let mut w = writer();
    let root = w.root();
    let trace = w.create_child(root, "trace", DATASET_CLASS).unwrap();
    w.set_value(trace, ElementType::Float64, &[1, 1, 5], vec![1.0f64; 5])
        .unwrap();
    let single = w.create_child(root, "single", DATASET_CLASS).unwrap();
    w.set_value(single, ElementType::Int64, &[1, 1], vec![7i64])
        .unwrap();

    w.write(root).unwrap();

    assert_eq!(w.api().object("/trace").unwrap().shape(), &[5]);
    assert_eq!(w.api().object("/single").unwrap().shape(), &[1]);
}

#[test]
fn test_second_write_is_noop() {
    let mut w = writer();
    let root = w.root();
    let entry = w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    let counts = w.create_child(entry, "counts", DATASET_CLASS).unwrap();
    w.set_value(counts, ElementType::UInt16, &[4], vec![1u16, 2, 3, 4])
        .unwrap();

    w.write(root).unwrap();
    w.write(counts).unwrap();
    w.write(root).unwrap();

    let api = w.api();
    assert_eq!(api.calls(Op::MakeGroup), 1);
    assert_eq!(api.calls(Op::MakeData), 1);
    assert_eq!(api.calls(Op::PutData), 1);
    assert_eq!(w.error_message(root).unwrap(), "");
}

#[test]
fn test_committed_node_is_frozen() {
    let mut w = writer();
    let root = w.root();
    let counts = w.create_child(root, "counts", DATASET_CLASS).unwrap();
    w.set_value(counts, ElementType::Int8, &[2], vec![1i8, 2])
        .unwrap();
    w.write(root).unwrap();

    let err = w
        .set_value(counts, ElementType::Int8, &[2], vec![3i8, 4])
        .unwrap_err();
    assert!(matches!(err, Error::Core(nxtree_core::Error::Committed(_))));
}

#[test]
fn test_root_accepts_new_children_after_write() {
    let mut w = writer();
    let root = w.root();
    w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    w.write(root).unwrap();

    w.create_child(root, "entry2", ENTRY_CLASS).unwrap();
    w.write(root).unwrap();

    let names: Vec<&str> = w.api().object("/").unwrap().member_names().collect();
    assert_eq!(names, vec!["entry", "entry2"]);
    assert_eq!(w.api().calls(Op::MakeGroup), 2);
    assert_eq!(w.entry_count(), 2);
}

#[test]
fn test_link_after_target() {
    let mut w = writer();
    let root = w.root();
    let entry = w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    let det = w.create_child(entry, "det", "NXdetector").unwrap();
    let counts = w.create_child(det, "counts", DATASET_CLASS).unwrap();
    w.set_value(counts, ElementType::Int32, &[3], vec![5i32, 6, 7])
        .unwrap();
    let data = w.create_child(entry, "data", "NXdata").unwrap();
    w.add_link(data, "counts", counts).unwrap();

    w.write(root).unwrap();

    assert_eq!(w.error_message(root).unwrap(), "");
    let api = w.api();
    let linked = api.object("/entry/data/counts").unwrap();
    assert_eq!(linked.path(), "/entry/det/counts");
    assert_eq!(linked.data(), Some(&ArrayData::Int32(vec![5, 6, 7])));
    assert_eq!(api.calls(Op::MakeData), 1);
}

#[test]
fn test_link_before_target() {
    let mut w = writer();
    let root = w.root();
    let entry = w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    let data = w.create_child(entry, "data", "NXdata").unwrap();
    let det = w.create_child(entry, "det", "NXdetector").unwrap();
    let counts = w.create_child(det, "counts", DATASET_CLASS).unwrap();
    w.set_value(counts, ElementType::Int32, &[3], vec![5i32, 6, 7])
        .unwrap();
    w.add_link(data, "counts", counts).unwrap();

    w.write(root).unwrap();

    assert_eq!(w.error_message(root).unwrap(), "");
    let api = w.api();
    assert_eq!(api.open_depth(), 0);
    assert_eq!(api.calls(Op::MakeData), 1);
    let via_data = api.object("/entry/data/counts").unwrap();
    let via_det = api.object("/entry/det/counts").unwrap();
    assert_eq!(via_data.path(), via_det.path());
    assert_eq!(via_det.data(), Some(&ArrayData::Int32(vec![5, 6, 7])));
    assert!(!w.node(counts).unwrap().is_relocated());
}

#[test]
fn test_link_through_named_handle() {
    let mut w = writer();
    let root = w.root();
    let entry = w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    let data = w.create_child(entry, "data", "NXdata").unwrap();
    w.add_link_to_handle(data, "signal", "monitor_counts").unwrap();
    let monitor = w.create_child(entry, "monitor", "NXmonitor").unwrap();
    let counts = w.create_child(monitor, "total", DATASET_CLASS).unwrap();
    w.set_value(counts, ElementType::UInt32, &[2], vec![10u32, 20])
        .unwrap();
    w.set_link_handle(counts, "monitor_counts").unwrap();

    w.write(entry).unwrap();

    assert_eq!(w.error_message(entry).unwrap(), "");
    let api = w.api();
    assert_eq!(
        api.object("/entry/data/signal").unwrap().data(),
        Some(&ArrayData::UInt32(vec![10, 20]))
    );
    assert_eq!(
        api.object("/entry/monitor/total").unwrap().path(),
        api.object("/entry/data/signal").unwrap().path()
    );
}

#[test]
fn test_link_to_self() {
    let mut w = writer();
    let root = w.root();
    let group = w.create_child(root, "g", "NXcollection").unwrap();
    w.add_link(group, "me", group).unwrap();

    w.write(root).unwrap();

    assert_eq!(w.error_message(root).unwrap(), "");
    assert_eq!(w.api().object("/g/me").unwrap().path(), "/g");
}

#[test]
fn test_link_to_uncommitted_ancestor() {
    let mut w = writer();
    let root = w.root();
    let entry = w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    let data = w.create_child(entry, "data", "NXdata").unwrap();
    w.add_link(data, "up", entry).unwrap();

    w.write(data).unwrap();

    assert_eq!(w.error_message(data).unwrap(), "");
    assert_eq!(w.api().open_depth(), 0);
    assert_eq!(w.api().object("/entry/data/up").unwrap().path(), "/entry");
    assert!(!w.node(entry).unwrap().is_committed());

    w.write(root).unwrap();

    assert_eq!(w.error_message(root).unwrap(), "");
    let api = w.api();
    assert_eq!(api.open_depth(), 0);
    let root_members: Vec<&str> = api.object("/").unwrap().member_names().collect();
    assert_eq!(root_members, vec!["entry"]);
    let data_members: Vec<&str> = api.object("/entry/data").unwrap().member_names().collect();
    assert_eq!(data_members, vec!["up"]);
    assert_eq!(api.calls(Op::MakeGroup), 2);
}

#[test]
fn test_self_link_committed_out_of_order() {
    let mut w = writer();
    let root = w.root();
    let entry = w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    let parent = w.create_child(entry, "p", "NXcollection").unwrap();
    let a = w.create_child(parent, "a", "NXcollection").unwrap();
    let c = w.create_child(entry, "c", "NXdata").unwrap();
    w.set_link_handle(a, "selfref").unwrap();
    w.add_link_to_handle(a, "me", "selfref").unwrap();
    w.add_link(c, "alias", a).unwrap();

    w.write(c).unwrap();

    assert_eq!(w.error_message(c).unwrap(), "");
    assert!(w.node(a).unwrap().is_committed());
    assert!(w.node(a).unwrap().is_relocated());
    assert!(!w.node(parent).unwrap().is_committed());
    assert_eq!(w.api().open_depth(), 0);
    assert_eq!(w.api().object("/entry/c/alias").unwrap().path(), "/entry/a");
    assert_eq!(w.api().object("/entry/a/me").unwrap().path(), "/entry/a");

    w.write(root).unwrap();

    assert_eq!(w.error_message(root).unwrap(), "");
    let api = w.api();
    assert_eq!(api.open_depth(), 0);
    assert_eq!(api.object("/entry/p/a").unwrap().path(), "/entry/a");
    assert!(!w.node(a).unwrap().is_relocated());
    assert_eq!(api.calls(Op::MakeGroup), 4);
}

#[test]
fn test_unpaired_link_is_reported() {
    let mut w = writer();
    let root = w.root();
    let entry = w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    w.add_link_to_handle(entry, "orphan", "nowhere").unwrap();
    let title = w.create_child(entry, "title", DATASET_CLASS).unwrap();
    w.set_value(title, ElementType::Char, &[3], "run").unwrap();

    w.write(root).unwrap();

    assert!(w
        .error_message(entry)
        .unwrap()
        .contains("linking not paired for nowhere"));
    assert!(!w.error_message(root).unwrap().is_empty());
    assert!(w.api().object("/entry/title").is_some());
    assert_eq!(w.api().open_depth(), 0);
}

#[test]
fn test_failure_contained_in_group() {
    let api = MemoryApi::new().with_fault(Op::PutData, "x");
    let mut w = writer_with(api, WriterConfig::default());
    let root = w.root();
    let group = w.create_child(root, "G", "NXcollection").unwrap();
    let mut ids = Vec::new();
    for name in ["a", "x", "b"] {
        let id = w.create_child(group, name, DATASET_CLASS).unwrap();
        w.set_value(id, ElementType::Int32, &[2], vec![1i32, 2])
            .unwrap();
        ids.push(id);
    }

    w.write(root).unwrap();

    let api = w.api();
    assert_eq!(api.open_depth(), 0);
    assert!(api.object("/G/a").unwrap().data().is_some());
    assert!(api.object("/G/b").unwrap().data().is_some());
    assert!(api.object("/G/x").unwrap().data().is_none());

    let x_message = w.error_message(ids[1]).unwrap().to_string();
    assert!(x_message.contains("/G/x"));
    assert!(x_message.contains("x(SDS)"));
    assert!(w.error_message(group).unwrap().contains(&x_message));
    assert!(w.error_message(root).unwrap().contains(&x_message));
    assert_eq!(w.error_message(ids[0]).unwrap(), "");
}

#[test]
fn test_close_failure_keeps_walking() {
    let api = MemoryApi::new()
        .with_fault(Op::CloseGroup, "G")
        .with_fault(Op::CloseData, "d");
    let mut w = writer_with(api, WriterConfig::default());
    let root = w.root();
    let group = w.create_child(root, "G", "NXcollection").unwrap();
    let a = w.create_child(group, "a", DATASET_CLASS).unwrap();
    w.set_value(a, ElementType::Int32, &[2], vec![1i32, 2])
        .unwrap();
    let d = w.create_child(root, "d", DATASET_CLASS).unwrap();
    w.set_value(d, ElementType::Int8, &[2], vec![3i8, 4])
        .unwrap();
    let h = w.create_child(root, "H", "NXcollection").unwrap();
    let b = w.create_child(h, "b", DATASET_CLASS).unwrap();
    w.set_value(b, ElementType::Int32, &[1], vec![5i32]).unwrap();

    w.write(root).unwrap();

    let message = w.error_message(root).unwrap();
    assert!(message.contains("file out of kilter"));
    assert!(message.contains("G(NXcollection)"));
    assert!(message.contains("d(SDS)"));
    assert!(w.error_message(group).unwrap().contains("file out of kilter"));
    assert!(w.error_message(d).unwrap().contains("file out of kilter"));
    assert_eq!(w.error_message(h).unwrap(), "");

    let api = w.api();
    assert_eq!(api.open_depth(), 0);
    let names: Vec<&str> = api.object("/").unwrap().member_names().collect();
    assert_eq!(names, vec!["G", "d", "H"]);
    assert_eq!(api.object("/H/b").unwrap().path(), "/H/b");
    assert_eq!(api.object("/H/b").unwrap().data(), Some(&ArrayData::Int32(vec![5])));
    assert_eq!(api.object("/G/a").unwrap().data(), Some(&ArrayData::Int32(vec![1, 2])));
    assert!(w.node(group).unwrap().is_committed());
}

#[test]
fn test_open_failure_skips_subtree() {
    let api = MemoryApi::new().with_fault(Op::MakeGroup, "bad");
    let mut w = writer_with(api, WriterConfig::default());
    let root = w.root();
    let bad = w.create_child(root, "bad", "NXcollection").unwrap();
    let inner = w.create_child(bad, "inner", DATASET_CLASS).unwrap();
    w.set_value(inner, ElementType::Int8, &[1], vec![1i8]).unwrap();
    let good = w.create_child(root, "good", "NXcollection").unwrap();

    w.write(root).unwrap();

    assert!(w.error_message(bad).unwrap().contains("bad(NXcollection)"));
    assert!(!w.node(bad).unwrap().is_committed());
    assert!(!w.node(inner).unwrap().is_committed());
    assert!(w.node(good).unwrap().is_committed());
    assert!(w.api().object("/good").is_some());
    assert_eq!(w.api().calls(Op::MakeData), 0);
}

#[test]
fn test_take_error_message_clears() {
    let mut w = writer();
    let root = w.root();
    w.add_link_to_handle(root, "dangling", "missing").unwrap();
    w.write(root).unwrap();

    let message = w.take_error_message(root).unwrap();
    assert!(message.contains("missing"));
    assert_eq!(w.error_message(root).unwrap(), "");
}

#[test]
fn test_existing_entry_is_reused() {
    let mut api = MemoryApi::new();
    api.make_group("entry", ENTRY_CLASS).unwrap();
    let mut w = writer_with(api, WriterConfig::default());
    assert_eq!(w.entry_count(), 1);

    let root = w.root();
    let first = w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    let second = w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    assert_eq!(first, second);

    let err = w.create_child(root, "entry", "NXdata").unwrap_err();
    assert!(matches!(
        err,
        Error::Core(nxtree_core::Error::AlreadyExists { .. })
    ));

    let run = w.create_child(first, "run2", DATASET_CLASS).unwrap();
    w.set_value(run, ElementType::Int32, &[1], vec![2i32]).unwrap();
    w.write(root).unwrap();

    assert_eq!(w.error_message(root).unwrap(), "");
    assert_eq!(w.api().calls(Op::MakeGroup), 1);
    assert!(w.api().object("/entry/run2").is_some());

    w.create_child(root, "entry2", ENTRY_CLASS).unwrap();
    assert_eq!(w.entry_count(), 2);
}

#[test]
fn test_placeholder_dataset() {
    let mut w = writer();
    let root = w.root();
    let empty = w.create_child(root, "empty", DATASET_CLASS).unwrap();
    w.write(root).unwrap();

    let object = w.api().object("/empty").unwrap();
    assert_eq!(object.element_type(), Some(ElementType::UInt8));
    assert_eq!(object.shape(), &[0]);
    assert!(object.data().is_none());
    assert!(w.node(empty).unwrap().is_committed());
}

#[test]
fn test_attributes_flushed_in_order() {
    let mut w = writer();
    let root = w.root();
    w.add_text_attribute(root, "title", "calibration").unwrap();
    let det = w.create_child(root, "det", "NXdetector").unwrap();
    w.add_attribute(det, "gain", ElementType::Float64, &[2], vec![1.5f64, 2.5])
        .unwrap();
    w.add_text_attribute(det, "units", "counts").unwrap();

    w.write(root).unwrap();

    let api = w.api();
    assert_eq!(
        api.object("/").unwrap().attribute("title").and_then(Value::as_text),
        Some("calibration")
    );
    let names: Vec<&str> = api
        .object("/det")
        .unwrap()
        .attributes()
        .iter()
        .map(|a| a.name.as_str())
        .collect();
    assert_eq!(names, vec!["gain", "units"]);
}

#[test]
fn test_compression_policy_applied() {
    let config = WriterConfig::default().with_compression(CompressionPolicy::Deflate(4));
    let mut w = writer_with(MemoryApi::new(), config);
    let root = w.root();
    let big = w.create_child(root, "big", DATASET_CLASS).unwrap();
    w.set_value(big, ElementType::Float32, &[600], vec![0.0f32; 600])
        .unwrap();
    let small = w.create_child(root, "small", DATASET_CLASS).unwrap();
    w.set_value(small, ElementType::Float32, &[10], vec![0.0f32; 10])
        .unwrap();
    let text = w.create_child(root, "text", DATASET_CLASS).unwrap();
    w.set_value(text, ElementType::Char, &[4], "abcd").unwrap();

    w.write(root).unwrap();

    let api = w.api();
    assert_eq!(api.object("/big").unwrap().compression(), Some(4));
    assert_eq!(api.object("/small").unwrap().compression(), None);
    assert_eq!(api.object("/text").unwrap().compression(), None);
}

#[test]
fn test_close_releases_file() {
    let mut w = writer();
    let root = w.root();
    w.create_child(root, "entry", ENTRY_CLASS).unwrap();
    w.write(root).unwrap();

    let mut api = w.close().unwrap();
    assert!(api.is_closed());
    assert_eq!(api.calls(Op::Flush), 1);
    assert!(matches!(api.group_dir(), Err(Error::Closed)));
}
