use anyhow::Context;
use clap::Parser;
use plaid_layout::utils::error::ErrorSeverity;
use plaid_layout::utils::logger;
use plaid_layout::{
    CliConfig, DesignConfig, DesignRunner, FileDesignPipeline, LocalStorage, LogFormat,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    match cli.log_format {
        LogFormat::Compact => logger::init_cli_logger(cli.verbose),
        LogFormat::Json => logger::init_json_logger(cli.verbose),
    }

    tracing::info!("Starting plaid-layout");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let mut config = DesignConfig::from_file(&cli.design)
        .with_context(|| format!("failed to load design file {}", cli.design.display()))?;
    cli.apply_to(&mut config);

    let storage = LocalStorage::new(config.output.path.clone());
    let runner = DesignRunner::new(FileDesignPipeline::new(storage, config));

    match runner.run().await {
        Ok(output_path) => {
            tracing::info!("✅ Layout design completed");
            println!("✅ Layout design completed");
            println!("📁 Output saved to: {}", output_path);
        }
        Err(e) => {
            tracing::error!(
                "❌ Layout design failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            for diagnostic in e.diagnostics() {
                tracing::error!("   {}: {}", diagnostic.rule, diagnostic.description);
            }
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

            let exit_code = match e.severity() {
                ErrorSeverity::Medium => 2,
                ErrorSeverity::High => 1,
                ErrorSeverity::Critical => 3,
            };
            std::process::exit(exit_code);
        }
    }

    Ok(())
}
