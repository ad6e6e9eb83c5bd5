use assetdef_core::{compute_content_hash, Address};
use assetdef_store::{extract_contracts, schema_status, OverrideIndex};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn document(contracts: usize) -> String {
    let mut xml = String::from(
        r#"<ts:token xmlns:ts="http://tokenscript.org/2020/06/tokenscript"><ts:contract name="bench">"#,
    );
    for n in 0..contracts {
        let address = Address::from_bytes([n as u8; 20]);
        xml.push_str(&format!(
            r#"<ts:address network="1">{}</ts:address>"#,
            address.to_checksum()
        ));
    }
    xml.push_str("</ts:contract></ts:token>");
    xml
}

fn bench_scan(c: &mut Criterion) {
    let xml = document(32);

    c.bench_function("indices/extract_contracts", |b| {
        b.iter(|| black_box(extract_contracts(black_box(&xml))).len())
    });

    c.bench_function("indices/schema_status", |b| {
        b.iter(|| black_box(schema_status(black_box(&xml))))
    });

    c.bench_function("indices/content_hash", |b| {
        b.iter(|| black_box(compute_content_hash(black_box(xml.as_bytes()))))
    });
}

fn bench_override_upsert(c: &mut Criterion) {
    let files: Vec<(String, String)> = (0..64)
        .map(|n| (format!("file-{}.tsml", n), document(n % 8 + 1)))
        .collect();

    c.bench_function("indices/upsert_64_files", |b| {
        b.iter(|| {
            let mut index = OverrideIndex::new();
            for (name, xml) in &files {
                black_box(index.upsert(name, xml, None));
            }
            black_box(index.len())
        })
    });
}

criterion_group!(benches, bench_scan, bench_override_upsert);
criterion_main!(benches);
