use clap::Parser;
use kube::client::Client;
use std::sync::Arc;

use nightshift_operator::args::Args;
use nightshift_operator::conf::Conf;
use nightshift_operator::libs::controllers::{self, State};
use nightshift_operator::libs::trace;
use nightshift_operator::libs::workloads::{DryRun, K8s, Workloads};

/// The nightshift operator
#[tokio::main]
async fn main() {
    // install a crypto provider for rustls
    // Rustls will complain if this is not run but we can ignore any errors
    // https://github.com/rustls/rustls/issues/1938
    let _ = rustls::crypto::ring::default_provider().install_default();
    // get command line args
    let args = Args::parse();
    // try to load a config file
    let conf = Conf::new(&args.config).expect("Failed to load config");
    // setup our tracer
    trace::setup(&conf.tracing);
    // build a client for the k8s api
    let client = Client::try_default()
        .await
        .expect("failed to create kube Client");
    // pick the store workload writes go through
    let store: Arc<dyn Workloads> = if args.dry_run {
        Arc::new(DryRun::settled())
    } else {
        Arc::new(K8s::new(&client))
    };
    let state = State::new(client, conf, store);
    // run both reconcilers until shutdown
    tokio::join!(
        controllers::configs::run(&state),
        controllers::groups::run(&state)
    );
}
