use clap::Parser;

fn main() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = txn_writer::Args::parse();
    let partition_range = match txn_writer::PartitionRange::parse(&args.partitions) {
        Ok(range) => range,
        Err(error) => {
            tracing::error!(%error, partitions = %args.partitions, "invalid --partitions flag");
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(%error, "failed to build tokio runtime");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(runtime.spawn(async move {
        txn_writer::run(args, partition_range).await
    }));

    runtime.shutdown_timeout(std::time::Duration::from_secs(30));

    match result {
        Ok(Ok(())) => std::process::exit(0),
        Ok(Err(error)) => {
            tracing::error!(%error, "writer exited with a fatal error");
            std::process::exit(1);
        }
        Err(join_error) => {
            tracing::error!(%join_error, "writer task panicked");
            std::process::exit(1);
        }
    }
}
