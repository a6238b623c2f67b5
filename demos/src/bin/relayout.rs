use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tj_demos::parsers::{BackendOptions, VariantOptions};
use tj_demos::runs::{DemoResult, report_result, run};
use tj_transpose::TransposeConfig;
use tracing_forest::ForestLayer;
use tracing_forest::util::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Which relayout to generate.
    #[arg(short, long, ignore_case = true, value_enum, default_value_t = VariantOptions::Tile)]
    variant: VariantOptions,

    /// Input spatial width.
    #[arg(short, long, default_value_t = 56)]
    iw: usize,

    /// Padded output width; defaults to `l_pad + iw + r_pad`.
    #[arg(long)]
    tr_iw: Option<usize>,

    #[arg(long, default_value_t = 0)]
    l_pad: usize,

    #[arg(long, default_value_t = 0)]
    r_pad: usize,

    #[arg(long, default_value_t = 4)]
    stride_w: usize,

    /// Distance between planes of the strided relayout.
    #[arg(long, default_value_t = 64)]
    tr_ld: usize,

    /// Workers cooperating on one strided relayout.
    #[arg(short = 't', long, default_value_t = 4)]
    nthr: usize,

    /// Source rows of the strided relayout.
    #[arg(long, default_value_t = 32)]
    ih: usize,

    /// Channel blocks relayouted by the tile kernel.
    #[arg(short, long, default_value_t = 256)]
    blocks: usize,

    #[arg(short = 'B', long, ignore_case = true, value_enum, default_value_t = BackendOptions::Auto)]
    backend: BackendOptions,

    /// JSON file with a full configuration; overrides the shape options above.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the generated instruction listing.
    #[arg(long)]
    listing: bool,
}

impl Args {
    fn transpose_config(&self) -> DemoResult<TransposeConfig> {
        if let Some(path) = &self.config {
            return Ok(serde_json::from_str(&fs::read_to_string(path)?)?);
        }
        let tr_iw = self
            .tr_iw
            .unwrap_or(self.l_pad + self.iw + self.r_pad);
        Ok(TransposeConfig::default()
            .with_first_conv(self.variant == VariantOptions::Strided)
            .with_widths(self.iw, tr_iw)
            .with_l_pad(self.l_pad)
            .with_stride_w(self.stride_w)
            .with_tr_ld(self.tr_ld)
            .with_nthr(self.nthr))
    }
}

fn main() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    Registry::default()
        .with(env_filter)
        .with(ForestLayer::default())
        .init();

    let args = Args::parse();

    let result = args
        .transpose_config()
        .and_then(|conf| run(&conf, args.backend.into(), args.blocks, args.ih, args.listing));
    report_result(result);
}
