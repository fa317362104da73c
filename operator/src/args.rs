use clap::Parser;

/// The command line args to pass to the nightshift operator
#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
pub struct Args {
    /// The path to load the config file from
    #[clap(short, long, default_value = "nightshift.yml")]
    pub config: String,
    /// Drive a pretend cluster instead of the k8s api
    #[clap(long, default_value_t)]
    pub dry_run: bool,
}
