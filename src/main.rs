#[tokio::main]
async fn main() {
    match wcb::app::run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("wcb: {err:#}");
            std::process::exit(1);
        }
    }
}
