//! Block pruning example for RoughDb
//!
//! This example demonstrates:
//! - Building a rough filter per block
//! - Pruning blocks for a few queries
//! - Persisting filters to a segment and a checkpoint
//! - Recovering the catalog from both

use anyhow::Context;
use roughdb::{
    FilterCatalog, FilterOptions, FilterSegmentReader, FilterSegmentWriter, Predicate, Value,
};

const ORDER_ID: u64 = 1;
const COUNTRY: u64 = 2;

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init();

    println!("=== RoughDb Block Pruning Example ===\n");

    let countries = ["de", "fr", "jp", "br", "ca", "in"];
    let options = FilterOptions::default().false_positive_rate(0.01);
    let catalog = FilterCatalog::new();

    // Each block holds 1000 consecutive orders from two countries.
    for block in 0..6u64 {
        let base = block as i64 * 1000;
        let local = [countries[block as usize], countries[(block as usize + 1) % countries.len()]];
        let rows = (base..base + 1000).flat_map(|id| {
            [(ORDER_ID, Value::Int(id)), (COUNTRY, Value::from(local[(id % 2) as usize]))]
        });
        catalog
            .get_or_create(block)
            .build(block + 1, &options, rows)
            .with_context(|| format!("building filter of block {}", block))?;
    }
    println!("Built rough filters for {} blocks", catalog.len());

    let queries = [
        ("order_id = 4242", Predicate::eq(ORDER_ID, 4242)),
        ("order_id BETWEEN 900 AND 2100", Predicate::between(ORDER_ID, 900, 2100)),
        ("country = 'jp'", Predicate::eq(COUNTRY, "jp")),
        ("country = 'us'", Predicate::eq(COUNTRY, "us")),
        (
            "country = 'fr' AND order_id > 3000",
            Predicate::eq(COUNTRY, "fr").and(Predicate::gt(ORDER_ID, 3000)),
        ),
    ];
    for (sql, predicate) in &queries {
        println!("{:<40} => scan blocks {:?}", sql, catalog.prune(predicate));
    }

    let dir = tempfile::tempdir()?;

    // Segment: append-only binary records.
    let segment_path = dir.path().join("filters.seg");
    {
        let mut writer = FilterSegmentWriter::new(&segment_path)?;
        for block in catalog.block_ids() {
            if let Some(filter) = catalog.get(block) {
                writer.append(block, &filter)?;
            }
        }
        writer.sync()?;
        println!("\nWrote {} bytes of filter records", writer.file_size());
    }
    let recovery = FilterSegmentReader::new(&segment_path)?.recover_all()?;
    let from_segment = FilterCatalog::new();
    let installed = from_segment.install_recovered(recovery);
    println!("Recovered {} filters from the segment", installed);

    // Checkpoint: one JSON document for the whole catalog.
    let checkpoint_path = dir.path().join("filters.json");
    catalog.save_checkpoint(&checkpoint_path)?;
    let (from_checkpoint, report) = FilterCatalog::load_checkpoint(&checkpoint_path)?;
    println!(
        "Recovered checkpoint: {} loaded, {} absent, {} degraded",
        report.loaded.len(),
        report.absent.len(),
        report.partially_loaded.len()
    );

    for (sql, predicate) in &queries {
        anyhow::ensure!(
            from_segment.prune(predicate) == catalog.prune(predicate)
                && from_checkpoint.prune(predicate) == catalog.prune(predicate),
            "recovered catalog disagrees on {}",
            sql
        );
    }
    println!("Recovered catalogs prune identically");

    Ok(())
}
