//! # 图片变换客户端：命令行入口
//!
//! 本文件仅负责参数解析、日志初始化与配置装配。
//! 业务逻辑分布在各子模块中，详见 `lib.rs` 架构文档。

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use transform_client::error::AppError;
use transform_client::transform::{
    self, CommandError, CommandReport, FsDownloadSink, HttpGateway, MemoryUrlPlatform, OperationKind,
    TransformConfig, TransformController,
};
use transform_client::{settings, storage};

#[derive(Parser)]
#[command(name = "transform-client")]
#[command(about = "远程图片变换客户端：convert / compress / crop / rotate / resize")]
struct Cli {
    #[arg(help = "操作：convert | compress | crop | rotate | resize")]
    operation: OperationKind,

    #[arg(help = "源图片路径")]
    file: PathBuf,

    /// 操作参数，可重复，例如 `-s quality=30 -s lossless=false`
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// 远程服务根地址，覆盖设置文件
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// 下载目录，覆盖设置文件
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// 设置文件路径（默认 ./settings.json）
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// 将本次生效的设置写回设置文件
    #[arg(long)]
    save_settings: bool,

    /// 以 JSON 输出结果与错误
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let json = cli.json;

    match run(cli).await {
        Ok(report) => {
            print_report(&report, json);
            ExitCode::SUCCESS
        }
        Err(err) => {
            print_error(&err, json);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<CommandReport, CommandError> {
    let (config, download_dir) = load_config(&cli).map_err(setup_failure)?;
    let edits = transform::parse_edits(cli.operation, cli.set.as_slice())?;

    let gateway = HttpGateway::new(&config)?;
    log::info!("🌐 变换服务: {}", gateway.base_url());

    let controller = TransformController::new(
        config,
        gateway,
        Arc::new(MemoryUrlPlatform::new()),
        Arc::new(FsDownloadSink::new(&download_dir)),
    );

    let report = transform::run_once(&controller, cli.operation, &cli.file, &edits).await?;

    match storage::download_dir_info(&download_dir) {
        Ok(info) => log::info!(
            "📂 下载目录 {}：{} 个文件，共 {} bytes",
            info.path,
            info.file_count,
            info.total_size
        ),
        Err(err) => log::warn!("读取下载目录信息失败: {err}"),
    }

    Ok(report)
}

/// 设置文件 → 命令行覆盖 → 校验，返回生效配置与下载目录。
fn load_config(cli: &Cli) -> Result<(TransformConfig, PathBuf), AppError> {
    let settings_path = cli.settings.clone().unwrap_or_else(settings::default_settings_path);
    let mut stored = settings::load_settings(&settings_path)?.unwrap_or_default();

    if let Some(url) = &cli.base_url {
        stored.base_url = Some(url.clone());
    }
    if let Some(out) = &cli.out {
        stored.download_dir = Some(out.to_string_lossy().to_string());
    }

    let mut config = TransformConfig::default();
    config.apply_settings(&stored)?;

    if cli.save_settings {
        settings::save_settings(&settings_path, &stored)?;
        log::info!("💾 设置已保存到 {}", settings_path.display());
    }

    let download_dir = storage::resolve_download_dir(stored.download_dir.as_deref())?;
    Ok((config, download_dir))
}

fn setup_failure(err: AppError) -> CommandError {
    CommandError {
        code: err.code(),
        stage: "setup",
        message: err.to_string(),
    }
}

fn print_report(report: &CommandReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(out) => println!("{out}"),
            Err(err) => log::error!("序列化结果失败: {err}"),
        }
        return;
    }

    println!(
        "✅ {} {} → {}（{} bytes）",
        report.operation,
        report.source,
        report.download.path.display(),
        report.download.size
    );
    if let Some(stats) = &report.stats {
        println!(
            "   原始 {} KB → 结果 {} KB（{}%）",
            stats.original_kb, stats.result_kb, stats.reduction_ratio
        );
    }
}

fn print_error(err: &CommandError, json: bool) {
    if json {
        match serde_json::to_string_pretty(err) {
            Ok(out) => println!("{out}"),
            Err(ser_err) => log::error!("序列化错误失败: {ser_err}"),
        }
        return;
    }

    eprintln!("❌ {} ({}): {}", err.code, err.stage, err.message);
}
