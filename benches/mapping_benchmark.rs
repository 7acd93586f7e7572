//! Benchmarks for mapping queries and incremental registry updates.
//!
//! Run with: cargo bench --bench mapping_benchmark

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use url::Url;
use yosegi::document::{CodeInformation, Mapping, MappingTable};
use yosegi::{DocumentRegistry, SfcLanguage};

/// `count` mappings of 10 bytes, each shifted by the 4 bytes of wrapper text
/// a generator would insert between segments.
fn table(count: usize) -> MappingTable {
    let mappings = (0..count)
        .map(|i| Mapping::offset(i * 10, i * 14 + 4, 10, CodeInformation::all()))
        .collect();
    MappingTable::new(mappings)
}

/// A component with `count` template lines and a script of the same length.
fn component(count: usize) -> String {
    let mut text = String::from("<template>\n");
    for i in 0..count {
        text.push_str(&format!("<p>{{{{ value_{i} }}}}</p>\n"));
    }
    text.push_str("</template>\n<script lang=\"ts\">\n");
    for i in 0..count {
        text.push_str(&format!("const value_{i} = {i}\n"));
    }
    text.push_str("</script>\n<style>\np { color: red }\n</style>\n");
    text
}

fn bench_offset_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("mapping_offsets");
    for count in [10, 100, 1000] {
        let table = table(count);
        let span = count * 10;
        group.bench_with_input(BenchmarkId::new("to_generated", count), &table, |b, table| {
            b.iter(|| {
                for offset in (0..span).step_by(7) {
                    black_box(table.to_generated_offsets(offset, |info| info.completion));
                }
            })
        });
        group.bench_with_input(BenchmarkId::new("to_source_ranges", count), &table, |b, table| {
            b.iter(|| {
                for start in (0..span).step_by(13) {
                    black_box(table.to_source_ranges(start, start + 20, |info| info.rename));
                }
            })
        });
    }
    group.finish();
}

fn bench_registry_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_update");
    for count in [10, 100, 1000] {
        let text = component(count);
        // one-character edit inside the style block
        let edited = text.replacen("red", "rex", 1);
        let uri = Url::parse("file:///bench/App.vue").unwrap();

        group.bench_with_input(BenchmarkId::new("style_edit", count), &count, |b, _| {
            let registry = DocumentRegistry::new(vec![Arc::new(SfcLanguage::default())]);
            registry.open(&uri, "vue", 0, &text);
            let mut version = 0;
            b.iter(|| {
                version += 1;
                let next = if version % 2 == 0 { &text } else { &edited };
                black_box(registry.get(&uri, version, next));
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_offset_queries, bench_registry_update);
criterion_main!(benches);
