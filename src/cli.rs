use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::ranking::Field;

#[derive(Parser, Debug)]
#[command(
    name = "campus-search",
    version,
    about = "Full-text search over a crawled campus web corpus with ranking evaluation"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Index(IndexArgs),
    Search(SearchArgs),
    Evaluate(EvaluateArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(long, default_value = ".cache/campus-search")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Directory holding `Textdata/` and `Htmldata/`.
    #[arg(long)]
    pub source_dir: PathBuf,

    /// Whitespace separated `identifier filename` pairs, one per line.
    #[arg(long)]
    pub url_table: PathBuf,

    #[arg(long, default_value_t = false)]
    pub append: bool,

    #[arg(long, default_value_t = false)]
    pub skip_nofollow: bool,

    #[arg(long)]
    pub min_content_length: Option<u64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum FieldArg {
    All,
    Content,
    Title,
}

impl FieldArg {
    pub fn fields(self) -> &'static [Field] {
        match self {
            Self::All => &[Field::Content, Field::Title],
            Self::Content => &[Field::Content],
            Self::Title => &[Field::Title],
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(long, default_value = ".cache/campus-search")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = FieldArg::All)]
    pub field: FieldArg,

    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub page_size: u64,

    #[arg(long, default_value_t = false)]
    pub raw: bool,

    #[arg(long, conflicts_with = "query")]
    pub queries_file: Option<PathBuf>,

    #[arg(long)]
    pub query: Option<String>,

    /// Time this many extra searches per query before displaying results.
    #[arg(long, default_value_t = 0)]
    pub repeat: u64,

    #[arg(long, default_value_t = false)]
    pub explain: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Re-rank at most this many times the requested hit count instead of every match.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub oversample: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long, default_value = ".cache/campus-search")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub oracle_dir: Option<PathBuf>,

    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub k: u64,

    #[arg(long)]
    pub queries_file: Option<PathBuf>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long)]
    pub rules: Option<PathBuf>,

    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub oversample: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/campus-search")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
