// src/main.rs

use jobpilot::{cli, run};

#[tokio::main]
async fn main() {
    let code = match run(cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("jobpilot error: {err:?}");
            1
        }
    };
    std::process::exit(code);
}
