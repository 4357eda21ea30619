#[tokio::main]
async fn main() {
    std::process::exit(veogen::cli::run().await);
}
