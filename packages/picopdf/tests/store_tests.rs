//! Store behavior on parsed documents: garbage collection, allocation,
//! replacement and trailer transfer.

mod common;

use common::*;
use picopdf::{
    parse, ErrorKind, Indirect, MemoryDevice, Object, ParseOptions, Ref,
};

fn pdf_with_orphan() -> Vec<u8> {
    let mut pdf = b"%PDF-1.4\n".to_vec();
    let off1 = push_obj(&mut pdf, 1, "<< /Type /Catalog /Pages 2 0 R >>");
    let off2 = push_obj(&mut pdf, 2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    let off3 = push_obj(&mut pdf, 3, "<< /Type /Page /Parent 2 0 R >>");
    let off4 = push_obj(&mut pdf, 4, "(orphan)");
    let xref = push_xref_table(
        &mut pdf,
        &[(
            0,
            vec![
                entry_free(0, 65535),
                entry_in_use(off1, 0),
                entry_in_use(off2, 0),
                entry_in_use(off3, 0),
                entry_in_use(off4, 0),
            ],
        )],
        "<< /Size 5 /Root 1 0 R >>",
    );
    push_footer(&mut pdf, xref);
    pdf
}

#[test]
fn collect_garbage_on_parsed_doc() {
    let mut doc = parse(MemoryDevice::new(pdf_with_orphan()), ParseOptions::default()).unwrap();
    assert_eq!(doc.store().len(), 4);

    doc.collect_garbage().unwrap();

    // Everything reachable from the trailer still resolves
    for num in 1..=3 {
        assert!(doc.store().get(Ref::new(num, 0)).is_some());
    }
    // The orphan is gone and its reference joined the free list
    assert!(doc.store().get(Ref::new(4, 0)).is_none());
    assert_eq!(
        doc.store().free_list().collect::<Vec<_>>(),
        vec![Ref::new(4, 1)]
    );
}

#[test]
fn allocation_continues_past_parsed_objects() {
    let mut doc = parse(MemoryDevice::new(minimal_pdf()), ParseOptions::default()).unwrap();
    assert_eq!(doc.store().max_object_number(), 3);

    let id = doc
        .store_mut()
        .create_object(Object::Int(5))
        .unwrap()
        .id();
    assert_eq!(id, Ref::new(4, 0));
    assert!(doc.store().get(id).unwrap().is_dirty());
}

#[test]
fn freed_reference_is_reused_before_minting() {
    let mut doc = parse(MemoryDevice::new(pdf_with_orphan()), ParseOptions::default()).unwrap();
    doc.collect_garbage().unwrap();

    // (4, 1) sits on the free list after collection
    let id = doc
        .store_mut()
        .create_object(Object::Bool(true))
        .unwrap()
        .id();
    assert_eq!(id, Ref::new(4, 1));
}

#[test]
fn push_replaces_parsed_object() {
    let mut doc = parse(MemoryDevice::new(minimal_pdf()), ParseOptions::default()).unwrap();
    doc.store_mut()
        .push(Indirect::new(Ref::new(3, 0), Object::Int(123)));
    assert_eq!(doc.store().len(), 3);
    assert_eq!(
        doc.store().get(Ref::new(3, 0)).unwrap().value.as_int(),
        Some(123)
    );
}

#[test]
fn removal_feeds_the_free_list() {
    let mut doc = parse(MemoryDevice::new(minimal_pdf()), ParseOptions::default()).unwrap();
    let removed = doc.store_mut().remove(Ref::new(3, 0), true).unwrap();
    assert!(removed.is_some());
    assert_eq!(
        doc.store().free_list().collect::<Vec<_>>(),
        vec![Ref::new(3, 1)]
    );
    assert!(doc.store().must_get(Ref::new(3, 0)).is_err());
    assert!(doc
        .store()
        .must_get(Ref::new(3, 0))
        .unwrap_err()
        .is(ErrorKind::ObjectNotFound));
}

#[test]
fn take_trailer_transfers_ownership() {
    let mut doc = parse(MemoryDevice::new(minimal_pdf()), ParseOptions::default()).unwrap();
    let trailer = doc.take_trailer().unwrap();
    assert!(trailer.get("Root").is_some());
    assert!(doc.take_trailer().is_none());
    assert!(doc.trailer().is_none());
}
