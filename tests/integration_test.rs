use civblp::allocation::Ptr;
use civblp::archive::{BlpFile, ParseOptions};
use civblp::deserialize::{Record, Value};
use civblp::header::{ParseError, StripeKind};
use civblp::recovery::{scan, AllocationHealth, ScanQuality};
use civblp::registry::{TypeRegistry, TRAIT_POLYMORPHIC};
use civblp::writer::PackageWriter;
use proptest::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// Little-endian object bytes.
#[derive(Default)]
struct Data(Vec<u8>);

impl Data {
    fn u16(mut self, v: u16) -> Self { self.0.extend_from_slice(&v.to_le_bytes()); self }
    fn u32(mut self, v: u32) -> Self { self.0.extend_from_slice(&v.to_le_bytes()); self }
    fn i32(mut self, v: i32) -> Self { self.0.extend_from_slice(&v.to_le_bytes()); self }
    fn f32(mut self, v: f32) -> Self { self.0.extend_from_slice(&v.to_le_bytes()); self }
    fn ptr(mut self, p: Ptr) -> Self { self.0.extend_from_slice(&p.0.to_le_bytes()); self }
    fn pad(mut self, n: usize) -> Self { self.0.resize(self.0.len() + n, 0); self }
    fn done(self) -> Vec<u8> { self.0 }
}

fn parse(w: PackageWriter) -> BlpFile {
    BlpFile::parse(w.finish().unwrap()).unwrap()
}

fn first<'a>(file: &'a BlpFile, type_name: &str) -> &'a civblp::Allocation {
    file.iter_entries_by_type(type_name).next().unwrap()
}

fn vec2_types(w: &mut PackageWriter) {
    w.types.add_struct("Vec2", 8, &[("x", "float", 0), ("y", "float", 4)]);
}

// ── Layout ────────────────────────────────────────────────────────────────────

#[test]
fn test_two_uint32_fields_scenario() {
    let mut w = PackageWriter::new();
    w.types.add_struct("Pair", 8, &[("field0", "uint32", 0), ("field1", "uint32", 4)]);
    w.objects.add_object("Pair", Data::default().u32(0x1122_3344).u32(0xAABB_CCDD).done());
    let bytes = w.finish().unwrap();

    assert_eq!(&bytes[..6], b"CIVBLP");
    assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 1);
    assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 32);

    let file = BlpFile::parse(bytes).unwrap();
    assert_eq!(file.header().package_offset, 32);
    let pair = first(&file, "Pair");
    assert_eq!(pair.size, 8);
    assert_eq!(pair.stripe_kind(), Some(StripeKind::PackageBlock));

    let record = file.deserialize_alloc(pair);
    assert_eq!(record.type_name.as_deref(), Some("Pair"));
    assert_eq!(record.field_names().collect::<Vec<_>>(), ["field0", "field1"]);
    assert_eq!(record.get("field0"), Some(&Value::UInt(0x1122_3344)));
    assert_eq!(record.get("field1"), Some(&Value::UInt(0xAABB_CCDD)));
}

#[test]
fn test_type_name_is_nul_stripped_string_allocation() {
    let mut w = PackageWriter::new();
    w.objects.add_object("Unit", vec![0; 4]);
    w.objects.add_object("BLP::City", vec![0; 4]);
    w.objects.add_object("Unit", vec![0; 4]);
    w.objects.add_untyped(vec![1, 2], 1);
    let file = parse(w);

    let mut typed = 0;
    for alloc in file.allocations() {
        if alloc.type_name.is_null() {
            assert_eq!(file.resolve_type_name(alloc), None);
            continue;
        }
        let target = file.resolve_pointer(alloc.type_name).unwrap();
        assert_eq!(target.index as u64, alloc.type_name.0 - 1);
        let bytes = file.alloc_bytes(target);
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let expected = std::str::from_utf8(&bytes[..end]).unwrap();
        assert_eq!(file.resolve_type_name(alloc), Some(expected));
        typed += 1;
    }
    assert_eq!(typed, 3);
    assert_eq!(
        file.type_names(),
        vec![("BLP::City".to_owned(), 1), ("Unit".to_owned(), 2)]
    );
}

#[test]
fn test_root_type_name() {
    let mut w = PackageWriter::new();
    w.root_type_name = Some("GameSave".into());
    let file = parse(w);
    assert_eq!(file.root_type_name().as_deref(), Some("GameSave"));
}

// ── Fallbacks ─────────────────────────────────────────────────────────────────

#[test]
fn test_zero_size_allocation_is_fallback() {
    let mut w = PackageWriter::new();
    w.types.add_struct("Pair", 8, &[("a", "uint32", 0), ("b", "uint32", 4)]);
    w.objects.add_object("Pair", Vec::new());
    let file = parse(w);
    let record = file.deserialize_alloc(first(&file, "Pair"));
    assert!(record.is_fallback());
    assert_eq!(record.raw(), Some(""));
}

#[test]
fn test_unregistered_type_is_raw_hex() {
    let mut w = PackageWriter::new();
    w.objects.add_object("Mystery", vec![0xDE, 0xAD, 0xBE, 0xEF]);
    let file = parse(w);
    let record = file.deserialize_alloc(first(&file, "Mystery"));
    assert_eq!(record.type_name.as_deref(), Some("Mystery"));
    assert_eq!(record.raw(), Some("deadbeef"));
}

#[test]
fn test_raw_hex_is_capped() {
    let mut w = PackageWriter::new();
    w.objects.add_untyped((0u8..16).collect(), 1);
    let bytes = w.finish().unwrap();
    let opts = ParseOptions { max_raw_bytes: 4, ..ParseOptions::default() };
    let file = BlpFile::parse_with_options(bytes, opts).unwrap();
    let record = file.deserialize_alloc(file.allocation(0).unwrap());
    assert_eq!(record.raw(), Some("00010203..."));
}

#[test]
fn test_overrunning_field_is_null_siblings_intact() {
    let mut w = PackageWriter::new();
    w.types.add_struct(
        "Wide",
        16,
        &[("a", "uint32", 0), ("b", "uint64", 4), ("c", "uint16", 2)],
    );
    w.objects.add_object("Wide", Data::default().u16(7).u16(9).u32(0).done());
    let file = parse(w);
    let record = file.deserialize_alloc(first(&file, "Wide"));
    assert_eq!(record.field_names().collect::<Vec<_>>(), ["a", "c", "b"]);
    assert_eq!(record.get("a"), Some(&Value::UInt(9 << 16 | 7)));
    assert_eq!(record.get("c"), Some(&Value::UInt(9)));
    assert_eq!(record.get("b"), Some(&Value::Null));
}

// ── Pointers ──────────────────────────────────────────────────────────────────

#[test]
fn test_null_and_dangling_pointers_decode_null() {
    let mut w = PackageWriter::new();
    w.types.add_struct("Node", 16, &[("value", "uint32", 0), ("next", "Node*", 8)]);
    w.objects.add_object("Node", Data::default().u32(1).pad(4).ptr(Ptr::NULL).done());
    w.objects.add_object("Node", Data::default().u32(2).pad(4).ptr(Ptr(999)).done());
    let file = parse(w);
    for alloc in file.iter_entries_by_type("Node") {
        let record = file.deserialize_alloc(alloc);
        assert_eq!(record.get("next"), Some(&Value::Null));
        assert!(record.get("value").unwrap().as_u64().is_some());
    }
    assert!(file.resolve_pointer(Ptr::NULL).is_none());
}

#[test]
fn test_pointer_chain_stops_at_max_depth() {
    let mut w = PackageWriter::new();
    w.types.add_struct("Node", 16, &[("value", "uint32", 0), ("next", "Node*", 8)]);
    let mut head = Ptr::NULL;
    for value in (0..6).rev() {
        head = w.objects.add_object("Node", Data::default().u32(value).pad(4).ptr(head).done());
    }
    let opts = ParseOptions { max_depth: 4, ..ParseOptions::default() };
    let file = BlpFile::parse_with_options(w.finish().unwrap(), opts).unwrap();

    let mut current = file.deserialize_pointer(head).unwrap();
    let mut records = 1;
    while let Some(next) = current.get("next").and_then(Value::as_record) {
        let next = next.clone();
        assert_eq!(next.get("value"), Some(&Value::UInt(records)));
        current = next;
        records += 1;
    }
    assert_eq!(records, 5);
    assert_eq!(current.get("next"), Some(&Value::Null));
}

#[test]
fn test_pointer_back_into_path_decodes_null() {
    let mut w = PackageWriter::new();
    w.types.add_struct("Node", 16, &[("value", "uint32", 0), ("next", "Node*", 8)]);
    let a = w.objects.reserve("Node");
    let b = w.objects.add_object("Node", Data::default().u32(2).pad(4).ptr(a).done());
    assert!(w.objects.set_data(a, Data::default().u32(1).pad(4).ptr(b).done()));
    let file = parse(w);

    for (start, first_value, second_value) in [(a, 1, 2), (b, 2, 1)] {
        let record = file.deserialize_pointer(start).unwrap();
        assert_eq!(record.get("value"), Some(&Value::UInt(first_value)));
        let next = record.get("next").and_then(Value::as_record).unwrap();
        assert_eq!(next.get("value"), Some(&Value::UInt(second_value)));
        assert_eq!(next.get("next"), Some(&Value::Null));
    }
}

fn count_records(record: &Record) -> usize {
    fn count(value: &Value) -> usize {
        match value {
            Value::Record(r) => count_records(r),
            Value::Array(items) => items.iter().map(count).sum(),
            _ => 0,
        }
    }
    1 + record.iter().map(|(_, v)| count(v)).sum::<usize>()
}

fn two_pointer_node(w: &mut PackageWriter) {
    w.types.add_struct(
        "Link",
        24,
        &[("prev", "Link*", 0), ("next", "Link*", 8), ("value", "uint32", 16)],
    );
}

fn link(prev: Ptr, next: Ptr, value: u32) -> Vec<u8> {
    Data::default().ptr(prev).ptr(next).u32(value).pad(4).done()
}

#[test]
fn test_self_and_doubly_linked_graphs_decode_once_per_path() {
    let mut w = PackageWriter::new();
    two_pointer_node(&mut w);
    let own = w.objects.reserve("Link");
    assert!(w.objects.set_data(own, link(own, own, 7)));

    let a = w.objects.reserve("Link");
    let b = w.objects.reserve("Link");
    let c = w.objects.reserve("Link");
    assert!(w.objects.set_data(a, link(c, b, 1)));
    assert!(w.objects.set_data(b, link(a, c, 2)));
    assert!(w.objects.set_data(c, link(b, a, 3)));
    let file = parse(w);

    let record = file.deserialize_pointer(own).unwrap();
    assert_eq!(record.get("value"), Some(&Value::UInt(7)));
    assert_eq!(record.get("prev"), Some(&Value::Null));
    assert_eq!(record.get("next"), Some(&Value::Null));

    // Each of b's neighbours reaches the third node, whose links both lead
    // back onto the path.
    let record = file.deserialize_pointer(b).unwrap();
    assert_eq!(count_records(&record), 5);
    let next = record.get("next").and_then(Value::as_record).unwrap();
    assert_eq!(next.get("value"), Some(&Value::UInt(3)));
    let third = next.get("next").and_then(Value::as_record).unwrap();
    assert_eq!(third.get("value"), Some(&Value::UInt(1)));
    assert_eq!(third.get("prev"), Some(&Value::Null));
    assert_eq!(third.get("next"), Some(&Value::Null));
}

#[test]
fn test_shared_subgraphs_stop_at_record_budget() {
    let mut w = PackageWriter::new();
    two_pointer_node(&mut w);
    let mut head = Ptr::NULL;
    for value in (0..40).rev() {
        head = w.objects.add_object("Link", link(head, head, value));
    }
    let opts = ParseOptions { max_records: 100, ..ParseOptions::default() };
    let file = BlpFile::parse_with_options(w.finish().unwrap(), opts).unwrap();

    let record = file.deserialize_pointer(head).unwrap();
    assert_eq!(count_records(&record), 101);
    // The budget is per call.
    assert_eq!(file.deserialize_pointer(head).unwrap(), record);
}

#[test]
fn test_self_containing_value_type_stops_at_record_budget() {
    let mut w = PackageWriter::new();
    w.types.add_struct("Loop", 0, &[("left", "Loop", 0), ("right", "Loop", 0)]);
    w.types.add_struct("Outer", 4, &[("id", "uint32", 0), ("inner", "Loop", 4)]);
    w.objects.add_object("Outer", Data::default().u32(3).done());
    let opts = ParseOptions { max_records: 64, ..ParseOptions::default() };
    let file = BlpFile::parse_with_options(w.finish().unwrap(), opts).unwrap();

    let record = file.deserialize_alloc(first(&file, "Outer"));
    assert_eq!(record.get("id"), Some(&Value::UInt(3)));
    assert_eq!(count_records(&record), 65);
}

#[test]
fn test_pointer_to_struct_and_four_byte_pointers() {
    let mut w = PackageWriter::new();
    vec2_types(&mut w);
    w.types.add_struct("Holder", 8, &[("id", "uint32", 0), ("pos", "Ptr<Vec2>", 4)]);
    w.objects.preamble.pointer_size = 4;
    let v = w.objects.add_object("Vec2", Data::default().f32(1.5).f32(-2.0).done());
    w.objects.add_object("Holder", Data::default().u32(3).u32(v.0 as u32).done());
    let file = parse(w);
    assert_eq!(file.preamble().pointer_size, 4);

    let record = file.deserialize_alloc(first(&file, "Holder"));
    let pos = record.get("pos").and_then(Value::as_record).unwrap();
    assert_eq!(pos.type_name.as_deref(), Some("Vec2"));
    assert_eq!(pos.get("x"), Some(&Value::Float(1.5)));
    assert_eq!(pos.get("y"), Some(&Value::Float(-2.0)));
}

// ── Field kinds ───────────────────────────────────────────────────────────────

#[test]
fn test_strings_both_encodings() {
    let mut w = PackageWriter::new();
    w.types.add_struct("City", 24, &[("name", "String", 0), ("alias", "const char*", 8), ("none", "String", 16)]);
    let name = w.objects.add_prefixed_string("Paris");
    let alias = w.objects.add_string("Lutetia");
    w.objects.add_object("City", Data::default().ptr(name).ptr(alias).ptr(Ptr::NULL).done());
    let file = parse(w);
    let record = file.deserialize_alloc(first(&file, "City"));
    assert_eq!(record.get("name"), Some(&Value::String("Paris".into())));
    assert_eq!(record.get("alias"), Some(&Value::String("Lutetia".into())));
    assert_eq!(record.get("none"), Some(&Value::Null));
}

#[test]
fn test_fundamentals() {
    let mut w = PackageWriter::new();
    w.types.add_struct(
        "Stats",
        16,
        &[
            ("flag",  "bool",   0),
            ("delta", "int8",   1),
            ("moves", "int16",  2),
            ("hp",    "int32",  4),
            ("ratio", "double", 8),
        ],
    );
    let mut data = Data::default().u16(0xFF01).u16((-3i16) as u16).i32(-40).done();
    data.extend_from_slice(&0.25f64.to_le_bytes());
    w.objects.add_object("Stats", data);
    let file = parse(w);
    let record = file.deserialize_alloc(first(&file, "Stats"));
    assert_eq!(record.get("flag"), Some(&Value::Bool(true)));
    assert_eq!(record.get("delta"), Some(&Value::Int(-1)));
    assert_eq!(record.get("moves"), Some(&Value::Int(-3)));
    assert_eq!(record.get("hp"), Some(&Value::Int(-40)));
    assert_eq!(record.get("ratio"), Some(&Value::Float(0.25)));
}

#[test]
fn test_nested_struct_by_value() {
    let mut w = PackageWriter::new();
    vec2_types(&mut w);
    w.types.add_struct("Unit", 12, &[("id", "uint32", 0), ("pos", "Game::Vec2", 4)]);
    w.objects.add_object("Unit", Data::default().u32(9).f32(1.5).f32(-2.0).done());
    let file = parse(w);
    let record = file.deserialize_alloc(first(&file, "Unit"));
    let pos = record.get("pos").and_then(Value::as_record).unwrap();
    assert_eq!(pos.get("x"), Some(&Value::Float(1.5)));
    assert_eq!(pos.get("y"), Some(&Value::Float(-2.0)));
    assert_eq!(record.get("id"), Some(&Value::UInt(9)));
}

#[test]
fn test_nested_struct_reads_only_its_own_bytes() {
    let mut w = PackageWriter::new();
    // `b` lies past Inner's declared size.
    w.types.add_struct("Inner", 4, &[("a", "uint32", 0), ("b", "uint32", 4)]);
    w.types.add_struct("Outer", 8, &[("inner", "Inner", 0), ("tail", "uint32", 4)]);
    w.objects.add_object("Outer", Data::default().u32(5).u32(6).done());
    let file = parse(w);
    let record = file.deserialize_alloc(first(&file, "Outer"));
    let inner = record.get("inner").and_then(Value::as_record).unwrap();
    assert_eq!(inner.get("a"), Some(&Value::UInt(5)));
    assert_eq!(inner.get("b"), Some(&Value::Null));
    assert_eq!(record.get("tail"), Some(&Value::UInt(6)));
}

#[test]
fn test_enum_fields() {
    let mut w = PackageWriter::new();
    w.types.add_enum("Era", &[("Antiquity", 0), ("Exploration", 1)]);
    w.types.add_struct("Civ", 8, &[("era", "Era", 0), ("bogus", "BLP::Era", 4)]);
    w.objects.add_object("Civ", Data::default().i32(1).i32(9).done());
    let file = parse(w);
    let record = file.deserialize_alloc(first(&file, "Civ"));
    assert_eq!(
        record.get("era"),
        Some(&Value::Enum { value: 1, name: Some("Exploration".into()) })
    );
    assert_eq!(record.get("bogus"), Some(&Value::Enum { value: 9, name: None }));
}

#[test]
fn test_collections() {
    let mut w = PackageWriter::new();
    vec2_types(&mut w);
    w.types.add_struct(
        "Bag",
        80,
        &[
            ("ids",    "Array<uint16>",    0),
            ("points", "BLP::Array<Vec2>", 16),
            ("refs",   "Vector<Vec2*>",    32),
            ("names",  "Array<String>",    48),
            ("empty",  "List<uint32>",     64),
        ],
    );

    let ids = w.objects.add_untyped(Data::default().u16(1).u16(2).u16(3).done(), 3);
    let points = w.objects.add_array("Vec2", Data::default().f32(1.0).f32(2.0).f32(3.0).f32(4.0).done(), 2);
    let v = w.objects.add_object("Vec2", Data::default().f32(5.0).f32(6.0).done());
    let refs = w.objects.add_untyped(Data::default().ptr(v).ptr(Ptr::NULL).done(), 2);
    let rome = w.objects.add_string("Rome");
    let babylon = w.objects.add_prefixed_string("Babylon");
    let names = w.objects.add_untyped(Data::default().ptr(rome).ptr(babylon).done(), 2);

    let bag = Data::default()
        .ptr(ids).u32(10).pad(4)
        .ptr(points).u32(2).pad(4)
        .ptr(refs).u32(2).pad(4)
        .ptr(names).u32(2).pad(4)
        .ptr(Ptr::NULL).u32(0).pad(4)
        .done();
    w.objects.add_object("Bag", bag);
    let file = parse(w);
    let record = file.deserialize_alloc(first(&file, "Bag"));

    // Count capped at what the target holds.
    assert_eq!(
        record.get("ids").and_then(Value::as_array).unwrap(),
        &[Value::UInt(1), Value::UInt(2), Value::UInt(3)]
    );

    let points = record.get("points").and_then(Value::as_array).unwrap();
    assert_eq!(points.len(), 2);
    let second = points[1].as_record().unwrap();
    assert_eq!(second.get("x"), Some(&Value::Float(3.0)));
    assert_eq!(second.get("y"), Some(&Value::Float(4.0)));

    let refs = record.get("refs").and_then(Value::as_array).unwrap();
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].as_record().unwrap().get("y"), Some(&Value::Float(6.0)));
    assert!(refs[1].is_null());

    assert_eq!(
        record.get("names").and_then(Value::as_array).unwrap(),
        &[Value::String("Rome".into()), Value::String("Babylon".into())]
    );
    assert_eq!(record.get("empty"), Some(&Value::Array(Vec::new())));
}

#[test]
fn test_collection_element_fallbacks() {
    let mut w = PackageWriter::new();
    vec2_types(&mut w);
    w.types.add_enum("Era", &[("Antiquity", 0), ("Exploration", 1)]);
    w.types.add_struct(
        "Shelf",
        48,
        &[
            ("blobs",  "Array<Opaque>", 0),
            ("eras",   "Array<Era>",    16),
            ("points", "Array<Vec2>",   32),
        ],
    );
    let blobs = w.objects.add_untyped(vec![0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33], 2);
    let eras = w.objects.add_untyped(Data::default().i32(1).i32(7).done(), 2);
    // Two Vec2 declared but only 12 bytes: each element gets 6.
    let points = w.objects.add_array("Vec2", Data::default().f32(1.0).u16(0).f32(2.0).u16(0).done(), 2);
    let shelf = Data::default()
        .ptr(blobs).u32(2).pad(4)
        .ptr(eras).u32(2).pad(4)
        .ptr(points).u32(2).pad(4)
        .done();
    w.objects.add_object("Shelf", shelf);
    let file = parse(w);
    let record = file.deserialize_alloc(first(&file, "Shelf"));

    assert_eq!(
        record.get("blobs").and_then(Value::as_array).unwrap(),
        &[Value::Raw("aabbcc".into()), Value::Raw("112233".into())]
    );
    assert_eq!(
        record.get("eras").and_then(Value::as_array).unwrap(),
        &[
            Value::Enum { value: 1, name: Some("Exploration".into()) },
            Value::Enum { value: 7, name: None },
        ]
    );
    let points = record.get("points").and_then(Value::as_array).unwrap();
    assert_eq!(points.len(), 2);
    for (point, x) in points.iter().zip([1.0, 2.0]) {
        let point = point.as_record().unwrap();
        assert_eq!(point.get("x"), Some(&Value::Float(x)));
        assert_eq!(point.get("y"), Some(&Value::Null));
    }
}

#[test]
fn test_unfollowed_collections_decode_null() {
    let mut w = PackageWriter::new();
    w.types.add_struct(
        "Ledger",
        32,
        &[("dangling", "Array<uint32>", 0), ("values", "Array<uint32>", 16)],
    );
    let values = w.objects.add_untyped(Data::default().u32(4).u32(5).done(), 2);
    w.objects.add_object(
        "Ledger",
        Data::default().ptr(Ptr(999)).u32(2).pad(4).ptr(values).u32(2).pad(4).done(),
    );
    let bytes = w.finish().unwrap();

    let file = BlpFile::parse(bytes.clone()).unwrap();
    let record = file.deserialize_alloc(first(&file, "Ledger"));
    assert_eq!(record.get("dangling"), Some(&Value::Null));
    assert_eq!(
        record.get("values").and_then(Value::as_array).unwrap(),
        &[Value::UInt(4), Value::UInt(5)]
    );

    let opts = ParseOptions { max_depth: 0, ..ParseOptions::default() };
    let file = BlpFile::parse_with_options(bytes, opts).unwrap();
    let record = file.deserialize_alloc(first(&file, "Ledger"));
    assert_eq!(record.get("values"), Some(&Value::Null));
}

#[test]
fn test_unknown_field_kind_is_raw_up_to_next_field() {
    let mut w = PackageWriter::new();
    w.types.add_struct("Odd", 8, &[("blob", "Opaque", 0), ("tail", "uint16", 6)]);
    w.objects.add_object("Odd", vec![0xAB, 0xCD, 0xEF, 0x01, 0x23, 0x45, 0x02, 0x00]);
    let file = parse(w);
    let record = file.deserialize_alloc(first(&file, "Odd"));
    assert_eq!(record.get("blob"), Some(&Value::Raw("abcdef012345".into())));
    assert_eq!(record.get("tail"), Some(&Value::UInt(2)));
}

#[test]
fn test_polymorphic_types_decode_flat() {
    let mut w = PackageWriter::new();
    w.types.add_type("Base", None, 4, TRAIT_POLYMORPHIC, 1, &[("id", "uint32", 0)]);
    w.objects.add_object("Base", Data::default().u32(42).done());
    let file = parse(w);
    assert!(file.registry().lookup_type("Base").unwrap().is_polymorphic);
    let record = file.deserialize_alloc(first(&file, "Base"));
    assert_eq!(record.get("id"), Some(&Value::UInt(42)));
}

#[test]
fn test_decoding_twice_is_identical() {
    let mut w = PackageWriter::new();
    vec2_types(&mut w);
    w.types.add_struct("Holder", 16, &[("pos", "Vec2*", 0), ("n", "uint32", 8)]);
    let v = w.objects.add_object("Vec2", Data::default().f32(1.0).f32(2.0).done());
    w.objects.add_object("Holder", Data::default().ptr(v).u32(5).pad(4).done());
    let file = parse(w);
    let holder = first(&file, "Holder");
    let a = file.deserialize_alloc(holder);
    let b = file.deserialize_alloc(holder);
    assert_eq!(a, b);
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[test]
fn test_registry_json_export_roundtrip() {
    let mut w = PackageWriter::new();
    vec2_types(&mut w);
    w.types.add_enum("Era", &[("Antiquity", 0)]);
    w.types.add_struct("Unit", 12, &[("era", "Era", 0), ("pos", "Vec2", 4)]);
    let file = parse(w);
    let json = file.registry().to_bytes().unwrap();
    let back = TypeRegistry::from_bytes(&json).unwrap();
    assert_eq!(&back, file.registry());
    assert_eq!(back.types.len(), 2);
    assert_eq!(back.enums.len(), 1);
}

// ── Files & errors ────────────────────────────────────────────────────────────

#[test]
fn test_open_from_disk() {
    let mut w = PackageWriter::new();
    w.types.add_struct("Pair", 8, &[("a", "uint32", 0), ("b", "uint32", 4)]);
    w.objects.add_object("Pair", Data::default().u32(1).u32(2).done());
    let mut temp = NamedTempFile::new().unwrap();
    temp.write_all(&w.finish().unwrap()).unwrap();
    temp.flush().unwrap();

    let file = BlpFile::open(temp.path()).unwrap();
    let record = file.deserialize_alloc(first(&file, "Pair"));
    assert_eq!(record.get("b"), Some(&Value::UInt(2)));
}

#[test]
fn test_bad_magic_is_fatal() {
    let mut temp = NamedTempFile::new().unwrap();
    temp.write_all(b"NOTBLP\x01\x00 plus some trailing garbage bytes").unwrap();
    temp.flush().unwrap();
    assert!(matches!(BlpFile::open(temp.path()), Err(ParseError::BadMagic { .. })));
    assert!(matches!(BlpFile::parse(Vec::new()), Err(ParseError::BadMagic { .. })));
}

#[test]
fn test_missing_path_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.blp");
    assert!(matches!(BlpFile::open(missing), Err(ParseError::Io(_))));
}

#[test]
fn test_truncated_file_degrades() {
    let mut w = PackageWriter::new();
    vec2_types(&mut w);
    for i in 0..8 {
        w.objects.add_object("Vec2", Data::default().f32(i as f32).f32(0.0).done());
    }
    let bytes = w.finish().unwrap();
    for cut in [28, 40, 120, bytes.len() / 2, bytes.len() - 1] {
        let file = BlpFile::parse(bytes[..cut].to_vec()).unwrap();
        for alloc in file.allocations() {
            let _ = file.deserialize_alloc(alloc);
        }
        let _ = scan(&file);
    }
}

// ── Recovery ──────────────────────────────────────────────────────────────────

#[test]
fn test_scan_healthy_file_is_full() {
    let mut w = PackageWriter::new();
    vec2_types(&mut w);
    w.objects.add_object("Vec2", Data::default().f32(1.0).f32(2.0).done());
    let file = parse(w);
    let report = scan(&file);
    assert_eq!(report.quality, ScanQuality::Full);
    assert_eq!(report.healthy, 1);
    assert!(report.summary().starts_with("Full"));
}

#[test]
fn test_scan_reports_out_of_bounds_and_still_decodes() {
    let mut w = PackageWriter::new();
    w.types.add_struct("Pair", 8, &[("a", "uint32", 0), ("b", "uint32", 4)]);
    let pair = w.objects.add_object("Pair", Data::default().u32(1).u32(2).done());
    let mut bytes = w.finish().unwrap();

    let index = pair.index().unwrap();
    let file = BlpFile::parse(bytes.clone()).unwrap();
    let temp = file.package_header().stripe(StripeKind::TempData);
    let size_at = file.package_range().start + temp.offset as usize + index * 40 + 12;
    bytes[size_at..size_at + 4].copy_from_slice(&0xFFFFu32.to_le_bytes());

    let file = BlpFile::parse(bytes).unwrap();
    let report = scan(&file);
    assert!(matches!(
        report.entries[index].health,
        AllocationHealth::OutOfBounds { declared_end, .. } if declared_end > 0xFFFF
    ));
    assert_eq!(report.out_of_bounds, 1);
    assert_eq!(report.quality, ScanQuality::Partial);

    let record = file.deserialize_pointer(pair).unwrap();
    assert_eq!(record.get("a"), Some(&Value::UInt(1)));
    assert_eq!(record.get("b"), Some(&Value::UInt(2)));
}

// ── Properties ────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_resolve_matches_index_rule(n in 0usize..16, p in 0u64..40) {
        let mut w = PackageWriter::new();
        for i in 0..n {
            w.objects.add_untyped(vec![i as u8], 1);
        }
        let file = parse(w);
        prop_assert_eq!(file.allocations().len(), n);
        prop_assert_eq!(
            file.resolve_pointer(Ptr(p)).is_none(),
            p == 0 || p - 1 >= n as u64
        );
    }

    #[test]
    fn prop_field_order_follows_offsets(order in Just(vec![0usize, 1, 2, 3]).prop_shuffle()) {
        const NAMES: [&str; 4] = ["a", "b", "c", "d"];
        let fields: Vec<(&str, &str, u32)> = order
            .iter()
            .map(|&i| (NAMES[i], "uint32", i as u32 * 4))
            .collect();
        let mut w = PackageWriter::new();
        w.types.add_struct("Quad", 16, &fields);
        w.objects.add_object("Quad", Data::default().u32(10).u32(11).u32(12).u32(13).done());
        let file = parse(w);
        let record = file.deserialize_alloc(first(&file, "Quad"));
        prop_assert_eq!(record.field_names().collect::<Vec<_>>(), NAMES.to_vec());
        prop_assert_eq!(record.get("c"), Some(&Value::UInt(12)));
    }
}
