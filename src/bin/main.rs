use biznavi::{config::Settings, service::TurnService, AnswerKind};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let settings = Settings::from_env()?;
    let service = TurnService::from_settings(&settings)?;
    let session_id = Uuid::new_v4();

    info!(%session_id, store = service.store_backend(), "BizNavi ready");

    println!("BizNavi: ask about sales, policies, forecasts or charts.");
    println!("Type 'quit' or 'exit' to leave.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "quit" | "exit") {
            println!("Goodbye!");
            break;
        }

        match service.submit_turn(session_id, input).await {
            Ok(answer) => {
                let label = match answer.kind {
                    AnswerKind::SystemError => "BizNavi [system error]",
                    _ => "BizNavi",
                };
                println!("\n{}: {}\n", label, answer.text);

                if let Some(chart) = &answer.chart {
                    println!("[chart] {}", serde_json::to_string(&chart.spec)?);
                }
                if !answer.tools_used.is_empty() {
                    let tools: Vec<_> = answer.tools_used.iter().map(|t| t.as_str()).collect();
                    println!("(tools: {}, cycles: {})\n", tools.join(", "), answer.cycles);
                }
            }
            Err(e) => eprintln!("\nTurn failed: {}\n", e),
        }
    }

    Ok(())
}
