use stress_test::{stress_test_entities, stress_test_scaling, stress_test_tree};

/// Initialize the `tracing` subscriber.
///
/// Respects `RUST_LOG` if set, otherwise logs at `info`.
fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> std::io::Result<()> {
    setup_tracing();
    let rt = tokio::runtime::Runtime::new()?;
    let violations = rt.block_on(async_main());
    if violations > 0 {
        tracing::error!(violations, "Invariant violations detected");
        std::process::exit(1);
    }
    Ok(())
}

async fn async_main() -> usize {
    let mut violations = 0;

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            CONCURRENT STRESS TESTS                          ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: few entities, heavy contention
    let stats = stress_test_entities(2, 8, 25).await;
    stats.print();
    violations += stats.violations;

    // Test 2: many entities, light contention
    let stats = stress_test_entities(50, 2, 20).await;
    stats.print();
    violations += stats.violations;

    // Test 3: one tree, concurrent structural edits
    let stats = stress_test_tree(8, 60).await;
    stats.print();
    violations += stats.violations;

    // Test 4: scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS (writers per entity)             ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    violations += stress_test_scaling(16, 4).await;

    if violations == 0 {
        println!("\n✓ All stress tests completed successfully!");
    }
    violations
}
