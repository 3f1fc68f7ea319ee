use clap::Parser;
use log::info;
use std::io::Write;
use std::str::FromStr;

use gyre::{EventLoopBuilder, Handler, HandlerContext, HolderKind};
use gyre_bootstrap::ServerBootstrap;

////////////////////////////////////////////////////////////////////////////////////////////////////
struct EchoServerHandler;

impl Handler for EchoServerHandler {
    fn name(&self) -> &str {
        "EchoServerHandler"
    }

    fn inbound_kind(&self) -> HolderKind {
        HolderKind::Bytes
    }

    fn outbound_kind(&self) -> HolderKind {
        HolderKind::Bytes
    }

    fn channel_active(&mut self, ctx: &HandlerContext) {
        info!("channel {:?} active", ctx.channel_id());
        ctx.fire_channel_active();
    }

    fn channel_inactive(&mut self, ctx: &HandlerContext) {
        info!("channel {:?} inactive", ctx.channel_id());
        ctx.fire_channel_inactive();
    }

    fn inbound_updated(&mut self, ctx: &HandlerContext) {
        let data = ctx.inbound().take_bytes();
        if !data.is_empty() {
            print!("handling {}", String::from_utf8_lossy(&data));
            ctx.next_outbound().push(Box::new(data));
            ctx.fire_outbound_updated();
        }
    }
}

#[derive(Parser)]
#[command(name = "Echo Server TCP")]
#[command(version = "0.2.0")]
#[command(about = "An echo server on the gyre event loop", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("0.0.0.0"))]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let host = cli.host;
    let port = cli.port;
    let log_level = log::LevelFilter::from_str(&cli.log_level)?;
    if cli.debug {
        env_logger::Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{}:{} [{}] {} - {}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.level(),
                    chrono::Local::now().format("%H:%M:%S.%6f"),
                    record.args()
                )
            })
            .filter(None, log_level)
            .init();
    }

    let event_loop = EventLoopBuilder::new().name("echo-server-loop").build();

    let mut bootstrap = ServerBootstrap::new(event_loop.clone());
    bootstrap.child_pipeline(|pipeline| {
        pipeline.add_back(EchoServerHandler);
    });

    let addr = format!("{}:{}", host, port).parse()?;
    let server_channel = bootstrap.bind(addr)?;
    info!(
        "listening on {:?}; press ctrl-c to exit",
        server_channel.local_addr()
    );

    // Park the main thread; the event loop and acceptor do the work.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
