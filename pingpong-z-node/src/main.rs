use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use pingpong_z::{
    Builder, ConfigError, SetupError,
    config::{PingPongConfig, ZenohMode},
    context::ZContext,
    pingpong::PingPongNode,
    qos::QosReliability,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod logger;

const EXIT_SETUP_FAILURE: u8 = 1;
const EXIT_CALLBACK_FAILURE: u8 = 2;

#[derive(Debug, Parser)]
#[command(version, about = "Periodic ping publisher with a self-echo filtering subscriber")]
struct Args {
    #[arg(short, long, help = "JSON5 configuration file")]
    config: Option<PathBuf>,

    #[arg(long)]
    node_name: Option<String>,

    #[arg(long)]
    namespace: Option<String>,

    #[arg(long, help = "Channel pings are published on [default: /microROS/pub]")]
    pub_channel: Option<String>,

    #[arg(long, help = "Channel pongs are read from [default: /microROS/sub]")]
    sub_channel: Option<String>,

    #[arg(long, value_parser = QosReliability::from_str, help = "reliable or best_effort")]
    pub_reliability: Option<QosReliability>,

    #[arg(long, value_parser = QosReliability::from_str, help = "reliable or best_effort")]
    sub_reliability: Option<QosReliability>,

    #[arg(long, help = "Ping period [default: 2000]")]
    period_ms: Option<u64>,

    #[arg(long, help = "Sleep between executor ticks [default: 10]")]
    idle_interval_ms: Option<u64>,

    #[arg(long, help = "Executor registration budget [default: 3]")]
    executor_capacity: Option<usize>,

    #[arg(long, help = "Frame label capacity in bytes [default: 50]")]
    buffer_capacity: Option<usize>,

    #[arg(long)]
    originator_id: Option<u32>,

    #[arg(long)]
    domain_id: Option<usize>,

    #[arg(long, help = "Zenoh endpoint to connect to, repeatable")]
    connect: Vec<String>,

    #[arg(long, value_parser = ZenohMode::from_str, help = "peer, client or router")]
    mode: Option<ZenohMode>,

    #[arg(long, help = "Use the in-process transport instead of zenoh")]
    loopback: bool,

    #[arg(long, help = "Stop after this many publish ticks")]
    ticks: Option<u64>,

    #[arg(long, help = "Emit logs as JSON")]
    json: bool,

    #[arg(long)]
    debug: bool,
}

impl Args {
    /// Defaults, file, `PINGPONG_CONFIG_OVERRIDE`, then flags.
    fn resolve_config(&self) -> Result<PingPongConfig, ConfigError> {
        let mut config = PingPongConfig::load(self.config.as_deref())?;

        if let Some(name) = &self.node_name {
            config.node_name = name.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if let Some(channel) = &self.pub_channel {
            config.pub_channel = channel.clone();
        }
        if let Some(channel) = &self.sub_channel {
            config.sub_channel = channel.clone();
        }
        if let Some(reliability) = self.pub_reliability {
            config.pub_qos.reliability = reliability;
        }
        if let Some(reliability) = self.sub_reliability {
            config.sub_qos.reliability = reliability;
        }
        config.timer_period_ms = self.period_ms.unwrap_or(config.timer_period_ms);
        config.idle_interval_ms = self.idle_interval_ms.unwrap_or(config.idle_interval_ms);
        config.executor_capacity = self.executor_capacity.unwrap_or(config.executor_capacity);
        config.buffer_capacity = self.buffer_capacity.unwrap_or(config.buffer_capacity);
        config.domain_id = self.domain_id.unwrap_or(config.domain_id);
        if self.originator_id.is_some() {
            config.originator_id = self.originator_id;
        }
        if self.mode.is_some() {
            config.zenoh.mode = self.mode;
        }
        if !self.connect.is_empty() {
            config.zenoh.connect = self.connect.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn setup(
    args: &Args,
    config: &PingPongConfig,
    token: &CancellationToken,
) -> Result<(ZContext, PingPongNode), SetupError> {
    let ctx = if args.loopback {
        info!("Using loopback transport");
        ZContext::loopback(config.domain_id)
    } else {
        config.context_builder().build()?
    };

    let node = ctx
        .create_node(&config.node_name)
        .with_namespace(&config.namespace)
        .build()?;

    let mut builder = config.pingpong_builder(&node);
    if let Some(ticks) = args.ticks {
        builder = builder.with_tick_limit(ticks, token.clone());
    }
    let pingpong = builder.build()?;
    Ok((ctx, pingpong))
}

fn main() -> ExitCode {
    let args = Args::parse();
    logger::init_logger(args.json, args.debug);

    let config = match args.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::from(EXIT_SETUP_FAILURE);
        }
    };

    let token = CancellationToken::new();
    let (ctx, mut pingpong) = match setup(&args, &config, &token) {
        Ok(ready) => ready,
        Err(e) => {
            error!("Setup failed: {}", e);
            return ExitCode::from(EXIT_SETUP_FAILURE);
        }
    };

    let c_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupted, stopping");
        c_token.cancel();
    }) {
        error!("Failed to install Ctrl-C handler: {}", e);
        return ExitCode::from(EXIT_SETUP_FAILURE);
    }

    info!(
        "Spinning: period={:?}, idle_interval={:?}",
        config.timer_period(),
        config.idle_interval()
    );
    let result = pingpong.spin(&token, config.spin_timeout(), config.idle_interval());

    let stats = pingpong.app().stats();
    info!(
        "Stopped: ticks={}, published={}, failures={}, echoes={}, forwarded={}",
        stats.ticks, stats.published, stats.publish_failures, stats.echoes, stats.forwarded
    );
    if let Err(e) = ctx.shutdown() {
        warn!("Transport shutdown failed: {}", e);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Executor halted: {}", e);
            ExitCode::from(EXIT_CALLBACK_FAILURE)
        }
    }
}
