use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "impro",
    author,
    version,
    about = "Run declarative image operation pipelines",
    long_about = "Queues the operations of QUERY (e.g. `resize=120,80&crop=center&webp`), \
                  assigns them to the available engines and streams the input through them."
)]
pub struct Args {
    /// Operations, as `name[=arg,arg...]` tokens joined with `&`
    #[arg(default_value = "")]
    pub query: String,

    /// Input file (default: stdin)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Media type of the input; detected from the file name or content if omitted
    #[arg(long)]
    pub source_type: Option<String>,

    /// JSON object merged into `metadata` output
    #[arg(long)]
    pub source_metadata: Option<String>,

    /// Largest output image, in pixels
    #[arg(long, env = "IMPRO_MAX_OUTPUT_PIXELS")]
    pub max_output_pixels: Option<u64>,

    /// Do not use this engine (repeatable)
    #[arg(long = "disable", value_name = "ENGINE")]
    pub disabled: Vec<String>,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// List the registered engines and exit
    #[arg(long)]
    pub list_engines: bool,

    /// Print the engine assignment as JSON instead of processing
    #[arg(long)]
    pub explain: bool,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse() {
        let args = Args::try_parse_from([
            "impro",
            "resize=10,10&png",
            "-i",
            "in.jpg",
            "--disable",
            "gm",
            "--disable",
            "image",
            "--explain",
        ])
        .unwrap();
        assert_eq!(args.query, "resize=10,10&png");
        assert_eq!(args.input, Some(PathBuf::from("in.jpg")));
        assert_eq!(args.disabled, vec!["gm", "image"]);
        assert!(args.explain);
        assert!(args.output.is_none());
    }
}
