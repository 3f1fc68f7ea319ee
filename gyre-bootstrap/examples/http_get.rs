use clap::Parser;
use log::info;
use std::io::Write;
use std::str::FromStr;

use gyre::{EventLoopBuilder, Handler, HandlerContext};
use gyre_bootstrap::Bootstrap;
use gyre_codec::{HttpChunk, HttpClientCodec, HttpRequest, HttpResponse};

////////////////////////////////////////////////////////////////////////////////////////////////////
struct PrintResponseHandler {
    done_tx: crossbeam_channel::Sender<()>,
}

impl Handler for PrintResponseHandler {
    fn name(&self) -> &str {
        "PrintResponseHandler"
    }

    fn inbound_updated(&mut self, ctx: &HandlerContext) {
        while let Some(msg) = ctx.inbound().pop_message() {
            let msg = match msg.downcast::<HttpResponse>() {
                Ok(response) => {
                    println!("{:?} {}", response.version, response.status);
                    for (name, value) in response.headers.iter() {
                        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
                    }
                    println!();
                    if !response.content.is_empty() {
                        std::io::stdout().write_all(&response.content).ok();
                    }
                    if !response.is_chunked() {
                        let _ = self.done_tx.send(());
                    }
                    continue;
                }
                Err(msg) => msg,
            };
            if let Ok(chunk) = msg.downcast::<HttpChunk>() {
                if chunk.is_last() {
                    let _ = self.done_tx.send(());
                } else {
                    std::io::stdout().write_all(&chunk.data).ok();
                }
            }
        }
    }
}

#[derive(Parser)]
#[command(name = "HTTP GET Client")]
#[command(version = "0.2.0")]
#[command(about = "Fetches a URL through the gyre HTTP client codec", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("127.0.0.1"))]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, default_value_t = format!("/"))]
    path: String,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let host = cli.host;
    let port = cli.port;
    let path = cli.path;
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

    info!("Connecting {}:{}...", host, port);

    let event_loop = EventLoopBuilder::new().name("http-get-loop").build();
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);

    let mut bootstrap = Bootstrap::new(event_loop.clone());
    bootstrap.pipeline(move |pipeline| {
        pipeline.add_back(HttpClientCodec::new());
        pipeline.add_back(PrintResponseHandler {
            done_tx: done_tx.clone(),
        });
    });

    let addr = format!("{}:{}", host, port).parse()?;
    let channel = bootstrap.connect(addr)?;

    let mut request = HttpRequest::get(path);
    request
        .headers
        .insert(http::header::HOST, host.parse()?);
    request
        .headers
        .insert(http::header::CONNECTION, "close".parse()?);
    channel.write_and_flush(request).wait();

    done_rx.recv()?;
    info!("response complete");

    bootstrap.graceful_stop();
    event_loop.shutdown();
    event_loop.await_termination(std::time::Duration::from_secs(5));
    Ok(())
}
