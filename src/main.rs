//! Notification Listener CLI
//!
//! 通过 stdio 运行监听服务，或管理开机重启代理

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use notification_listener::{
    BootAgent, ControlChannel, ControlServer, JsonLinesSink, ListenerService, Preferences,
    Settings, SharedWriter, ShellPlatform,
};
use notification_listener::service::StaticContacts;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "nl")]
#[command(about = "Notification Listener - 监听系统通知与来电状态")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Default)]
struct ServeArgs {
    /// 接收所有来源（忽略 allow-list）
    #[arg(long)]
    allow_all: bool,
    /// 数据目录（优先于 NL_DATA_DIR；settings.json 也从这里读取）
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动 stdio 控制服务
    Serve(ServeArgs),
    /// 开机触发：按持久化配置恢复服务，然后进入 stdio 控制服务
    Boot(ServeArgs),
    /// 查看持久化状态
    Status {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// 安装开机重启代理 (launchd)
    InstallAgent,
    /// 卸载开机重启代理
    UninstallAgent,
}

fn load_settings(data_dir: Option<PathBuf>) -> Result<Settings> {
    Settings::load_in(data_dir.or_else(Settings::data_dir_override))
}

async fn serve(args: ServeArgs, boot: bool) -> Result<()> {
    let mut settings = load_settings(args.data_dir)?;
    settings.allow_all |= args.allow_all;

    let out = SharedWriter::stdout();
    let platform = Arc::new(ShellPlatform::from_settings(&settings));
    let service = ListenerService::builder(platform, Arc::new(JsonLinesSink::new(out.clone())))
        .settings(&settings)
        .contacts(Arc::new(StaticContacts::new(settings.contacts.clone())))
        .build()?;

    if boot {
        match service.restart_after_external_trigger() {
            Ok(true) => info!(state = service.state().as_str(), "Service restored after boot"),
            Ok(false) => info!("Nothing to restore after boot"),
            Err(e) => error!(code = e.code(), error = %e, "Failed to restore service after boot"),
        }
    }

    let server = ControlServer::new(ControlChannel::new(service.clone()), out);
    server.run().await?;

    // stdin 关闭不等于 stopService：运行标记保留，下次开机照常恢复
    service.sync();
    service.preferences().flush();
    Ok(())
}

fn status(json: bool, data_dir: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(data_dir)?;
    let path = settings.preferences_path();
    let state = if path.exists() {
        Preferences::load_file(&path)?
    } else {
        Default::default()
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("数据目录: {}", settings.data_dir.display());
    if state.service_running {
        println!("🟢 服务标记为运行中");
    } else {
        println!("⚪ 服务未运行");
    }
    if let Some(config) = &state.service_config {
        println!("   标题: {}", config.title);
        println!("   前台: {}", if config.foreground { "是" } else { "否" });
    }
    if let Some(id) = state.event_callback {
        println!("   事件回调: {}", id);
    }
    if let Ok(agent_status) = BootAgent::new(&settings).and_then(|a| a.status()) {
        let label = match (agent_status.installed, agent_status.loaded) {
            (false, _) => "未安装",
            (true, true) => "已加载",
            (true, false) => "已安装但未加载",
        };
        println!("   开机代理: {}", label);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 日志写 stderr，stdout 留给控制协议
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("notification_listener=info,nl=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => serve(args, false).await?,
        Commands::Boot(args) => serve(args, true).await?,
        Commands::Status { json, data_dir } => status(json, data_dir)?,
        Commands::InstallAgent => {
            let agent = BootAgent::new(&Settings::load()?)?;
            match agent.install() {
                Ok(()) => {
                    println!("✅ 开机代理已安装");
                    println!("   plist: {}", agent.plist_path().display());
                }
                Err(e) => {
                    eprintln!("❌ 安装失败: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::UninstallAgent => {
            let agent = BootAgent::new(&Settings::load()?)?;
            match agent.uninstall() {
                Ok(()) => println!("✅ 开机代理已卸载"),
                Err(e) => {
                    eprintln!("❌ 卸载失败: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
