use anyhow::Context;
use clap::Parser;
use dynamic_http_transform::domain::model::Record;
use dynamic_http_transform::utils::error::{ErrorSeverity, EtlError};
use dynamic_http_transform::utils::{logger, validation::Validate};
use dynamic_http_transform::{
    CliConfig, DynamicHttpTransform, FormatPageFactory, JsonLinesEmitter, ReqwestExecutor,
    TransformEngine, TransformSettings,
};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

#[tokio::main]
async fn main() {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting dynamic-http-transform CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    if let Err(e) = run(&config).await {
        let exit_code = report(&e);
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

async fn run(config: &CliConfig) -> anyhow::Result<()> {
    config.validate()?;

    let settings = TransformSettings::from_file(&config.config)
        .with_context(|| format!("loading configuration from {}", config.config))?;
    let transform = DynamicHttpTransform::new(
        settings.build()?,
        settings.executor()?,
        settings.page_factory(),
    )?;
    let records = read_records(&config.input)
        .with_context(|| format!("opening input {}", config.input))?;

    if config.dry_run {
        return dry_run(&transform, records);
    }

    let output: Box<dyn Write + Send> = if config.output == "-" {
        Box::new(BufWriter::new(std::io::stdout()))
    } else {
        let file = File::create(&config.output)
            .with_context(|| format!("creating output {}", config.output))?;
        Box::new(BufWriter::new(file))
    };
    let errors: Box<dyn Write + Send> = match &config.errors {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("creating error output {}", path))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(std::io::stderr()),
    };

    let mut emitter = JsonLinesEmitter::new(output, errors);
    let engine = TransformEngine::new(transform);
    let result = engine.run(records, &mut emitter).await;
    // 中止時也要把已輸出的記錄寫出
    emitter.flush()?;
    let summary = result?;

    log_summary(&config.output, summary.emitted_records, summary.emitted_errors);
    Ok(())
}

/// JSON Lines, read lazily; blank lines are ignored.
fn read_records(input: &str) -> std::io::Result<impl Iterator<Item = Result<Record, EtlError>>> {
    let reader: Box<dyn BufRead> = if input == "-" {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(BufReader::new(File::open(input)?))
    };

    Ok(reader
        .lines()
        .filter(|line| !matches!(line, Ok(text) if text.trim().is_empty()))
        .map(|line| -> Result<Record, EtlError> {
            let line = line?;
            Ok(serde_json::from_str(&line)?)
        }))
}

fn dry_run(
    transform: &DynamicHttpTransform<ReqwestExecutor, FormatPageFactory>,
    records: impl Iterator<Item = Result<Record, EtlError>>,
) -> anyhow::Result<()> {
    tracing::info!("🔍 Dry run: resolving URLs without calling the endpoint");

    let mut stdout = std::io::stdout().lock();
    for (index, record) in records.enumerate() {
        let record = record?;
        match transform.resolve_url(&record) {
            Ok(url) => writeln!(stdout, "{}", url)?,
            Err(e) => tracing::warn!("⚠️ Record {} has no URL: {}", index + 1, e),
        }
    }
    Ok(())
}

fn log_summary(output: &str, emitted: usize, errors: usize) {
    tracing::info!("✅ Transform completed successfully!");
    if output != "-" {
        tracing::info!("📁 Output saved to: {}", output);
    }
    tracing::info!("📊 {} records emitted, {} errors", emitted, errors);
}

/// Logs the failure and returns the process exit code.
fn report(e: &anyhow::Error) -> i32 {
    let Some(etl) = e.downcast_ref::<EtlError>() else {
        tracing::error!("❌ Transform failed: {:#}", e);
        eprintln!("❌ {:#}", e);
        return 1;
    };

    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Transform failed: {:#} (Category: {:?}, Severity: {:?})",
        e,
        etl.category(),
        etl.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", etl.recovery_suggestion());

    // 輸出用戶友好的錯誤信息
    eprintln!("❌ {}", etl.user_friendly_message());
    eprintln!("💡 建議: {}", etl.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    match etl.severity() {
        ErrorSeverity::Low => 0,      // 警告，但成功
        ErrorSeverity::Medium => 2,   // 重試錯誤
        ErrorSeverity::High => 1,     // 處理錯誤
        ErrorSeverity::Critical => 3, // 端點不可用，job 中止
    }
}
