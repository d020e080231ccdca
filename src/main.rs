use chinadrugtrials_crawler::{
    config::{CrawlConfig, BASE_URL, DEFAULT_FILTERS, DEFAULT_KEYWORD, DEFAULT_STATE},
    run, BootstrapVariant, DetailMode, HttpTransport, OutputStore, RunOptions, RunOutcome,
    SearchQuery, Session, TrialCrawler,
};
use clap::{Parser, ValueEnum};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_error::ErrorLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DetailModeArg {
    Generic,
    Investigators,
}

impl From<DetailModeArg> for DetailMode {
    fn from(mode: DetailModeArg) -> Self {
        match mode {
            DetailModeArg::Generic => DetailMode::Generic,
            DetailModeArg::Investigators => DetailMode::Investigators,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BootstrapArg {
    Root,
    SearchPage,
}

/// 搜索中国药物临床试验登记与信息公示平台
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Search keyword, prompted for when omitted
    #[arg(short, long)]
    keywords: Option<String>,

    /// Filter keywords separated by spaces, prompted for when omitted
    #[arg(short, long)]
    filter: Option<String>,

    #[arg(short, long)]
    indication: Option<String>,

    /// Registration number
    #[arg(short, long)]
    reg_no: Option<String>,

    /// Trial status
    #[arg(short, long, default_value = DEFAULT_STATE)]
    state: String,

    /// Search every trial status, overriding --state
    #[arg(short, long)]
    all_states: bool,

    #[arg(short, long)]
    drugs_name: Option<String>,

    #[arg(short, long, default_value = "1")]
    ckm_index: String,

    /// Maximum number of result pages, all pages when omitted
    #[arg(short, long)]
    pages: Option<u32>,

    /// Trial list file name, defaults to <date>_<keyword>_<filters>.md
    #[arg(short, long)]
    output: Option<String>,

    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Directory for per-trial detail files, defaults to <output-dir>/details
    #[arg(long)]
    detail_dir: Option<PathBuf>,

    /// Fetch the detail page of every trial
    #[arg(long)]
    detail: bool,

    #[arg(long, value_enum, default_value_t = DetailModeArg::Investigators)]
    detail_mode: DetailModeArg,

    #[arg(long, value_enum, default_value_t = BootstrapArg::Root)]
    bootstrap: BootstrapArg,

    /// Replay archived HTML pages instead of fetching them when available
    #[arg(short, long)]
    local: bool,

    /// Only crawl the first results page
    #[arg(long)]
    no_auto_pages: bool,

    /// Verbose logging and extra intermediate files
    #[arg(long)]
    debug: bool,

    #[arg(long, env = "CDT_BASE_URL", default_value = BASE_URL)]
    base_url: String,
}

fn prompt(question: &str) -> io::Result<String> {
    println!("{}", question);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_filter = if args.debug {
        "debug,html5ever=error,selectors=error,hyper=warn,reqwest=info"
    } else {
        "info,html5ever=error,selectors=error,hyper=warn,reqwest=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL")
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(ErrorLayer::default())
        .init();

    let keyword = match args.keywords.clone() {
        Some(k) => k,
        None => {
            let k = prompt("请输入搜索关键词（例如：KRAS）：")?;
            if k.is_empty() {
                println!("未输入搜索关键词，将使用默认关键词：{}", DEFAULT_KEYWORD);
                DEFAULT_KEYWORD.to_string()
            } else {
                k
            }
        }
    };

    let filter_input = match args.filter.clone() {
        Some(f) => f,
        None => {
            let f = prompt("请输入过滤关键词（用空格分隔，例如：胰腺癌 实体瘤）：")?;
            if f.is_empty() {
                println!("未输入过滤关键词，将使用默认过滤关键词：{}", DEFAULT_FILTERS.join(" "));
                DEFAULT_FILTERS.join(" ")
            } else {
                f
            }
        }
    };
    let filters = filter_input
        .split_whitespace()
        .map(ToString::to_string)
        .collect::<Vec<_>>();

    println!("搜索关键词: {}", keyword);
    println!("过滤关键词: {}", filters.join(", "));

    let config = CrawlConfig {
        base_url: args.base_url.trim_end_matches('/').to_string(),
        detail_dir: args
            .detail_dir
            .clone()
            .unwrap_or_else(|| args.output_dir.join("details")),
        output_dir: args.output_dir.clone(),
        max_pages: args.pages,
        auto_all_pages: !args.no_auto_pages,
        use_local_files: args.local,
        debug: args.debug,
        ..Default::default()
    };

    let query = SearchQuery {
        keywords: keyword,
        indication: args.indication.clone().unwrap_or_default(),
        reg_no: args.reg_no.clone().unwrap_or_default(),
        state: if args.all_states {
            String::new()
        } else {
            args.state.clone()
        },
        drugs_name: args.drugs_name.clone().unwrap_or_default(),
        ckm_index: args.ckm_index.clone(),
    };

    let options = RunOptions {
        query,
        filters,
        detail_mode: args.detail.then(|| args.detail_mode.into()),
        list_name: args.output.clone(),
        bootstrap: match args.bootstrap {
            BootstrapArg::Root => BootstrapVariant::Root,
            BootstrapArg::SearchPage => BootstrapVariant::RootAndSearchPage,
        },
    };

    let transport = HttpTransport::new(&config.base_url)?;
    let store = OutputStore::new(&config.output_dir, &config.detail_dir);
    let crawler = TrialCrawler::new(Session::new(transport, config), store);

    match run(&crawler, &options).await? {
        RunOutcome::NoResults => {
            println!(
                "未找到与过滤关键词相关的临床试验: {}",
                options.filters.join(", ")
            );
        }
        RunOutcome::Completed(report) => {
            println!(
                "成功提取 {} 个临床试验并保存到 {}",
                report.trials,
                report.list_path.display()
            );
            if options.detail_mode.is_some() {
                println!("获取到 {} 个试验的详细信息", report.detailed);
            }
            for path in &report.reports {
                println!("已生成: {}", path.display());
            }
        }
    }

    Ok(())
}
