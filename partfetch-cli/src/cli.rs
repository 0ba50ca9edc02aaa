use clap::Parser;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Download byte ranges of remote resources",
    long_about = "Downloads a whole remote resource, or only selected byte ranges of it.\n\
                  \n\
                  Requested parts are coalesced into fewer, larger ranges before they are\n\
                  requested. Servers answering with one multipart body, one range per request,\n\
                  or the whole resource are all handled, and only the requested bytes are\n\
                  written. Interrupted whole-resource downloads are resumed, and previously\n\
                  downloaded files are only fetched again when the server reports a change."
)]
pub struct CliArgs {
    /// URL of the resource to download
    #[arg(required = true, help = "URL of the remote resource")]
    pub url: String,

    /// Output file
    #[arg(
        short,
        long,
        help = "Destination file (default: name proposed by the server or taken from the URL)"
    )]
    pub output: Option<PathBuf>,

    /// Byte ranges to download
    #[arg(
        long = "part",
        short = 'p',
        value_name = "OFFSET:LENGTH",
        help = "Download only this byte range (can be used multiple times, sorted by offset). Sizes accept units, e.g. '1M:64K'"
    )]
    pub parts: Vec<String>,

    /// How parts are coalesced into requested ranges
    #[arg(
        long,
        value_name = "METHOD",
        help = "Range coalescing method: none, auto, cluster, cluster(N), blocked(SIZE) or a block size in bytes"
    )]
    pub range_method: Option<String>,

    /// Overall timeout in seconds
    #[arg(long, help = "Overall timeout in seconds for HTTP requests (0 for none)")]
    pub timeout: Option<u64>,

    /// Connection timeout in seconds
    #[arg(
        long,
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: Option<u64>,

    /// Read timeout in seconds
    #[arg(
        long,
        help = "Read timeout in seconds (maximum time between receiving data chunks)"
    )]
    pub read_timeout: Option<u64>,

    /// Write buffer size
    #[arg(
        long,
        value_name = "SIZE",
        help = "Buffer size for writing to disk with optional unit (e.g. \"64KB\")"
    )]
    pub chunk_size: Option<String>,

    #[arg(
        long,
        help = "Download again when the server reports that a previously downloaded file changed"
    )]
    pub update_if_out_of_date: bool,

    #[arg(
        long,
        help = "Trust previously downloaded files without asking the server"
    )]
    pub assume_fresh: bool,

    #[arg(
        short = 'k',
        long = "insecure",
        help = "Accept invalid TLS certificates (use only with trusted servers)"
    )]
    pub danger_accept_invalid_certs: bool,

    #[arg(long, help = "Do not record or check validators of downloaded files")]
    pub no_cache: bool,

    #[arg(long, help = "Directory for recorded validators (default: system temp dir)")]
    pub cache_dir: Option<PathBuf>,

    /// Settings file
    #[arg(
        long,
        short = 'c',
        value_name = "FILE",
        help = "JSON settings file; command line options take precedence"
    )]
    pub config: Option<PathBuf>,

    /// Custom HTTP headers for download requests
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Show progress bar
    #[arg(
        short = 'P',
        long = "progress",
        default_value = "false",
        help = "Show a progress bar while downloading"
    )]
    pub show_progress: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let args = CliArgs::try_parse_from([
            "partfetch",
            "http://example.com/data.grib",
            "-p",
            "0:10",
            "--part",
            "100:20",
            "--range-method",
            "cluster(4)",
            "-H",
            "Referer: x",
            "--no-cache",
        ])
        .unwrap();

        assert_eq!(args.url, "http://example.com/data.grib");
        assert_eq!(args.parts, vec!["0:10", "100:20"]);
        assert_eq!(args.range_method.as_deref(), Some("cluster(4)"));
        assert_eq!(args.headers, vec!["Referer: x"]);
        assert!(args.no_cache);
        assert!(!args.danger_accept_invalid_certs);
        assert!(args.output.is_none());
        assert!(args.timeout.is_none());
    }

    #[test]
    fn test_url_is_required() {
        assert!(CliArgs::try_parse_from(["partfetch"]).is_err());
    }
}
