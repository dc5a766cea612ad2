use gold_investment_agent::{config::AgentConfig, controller::SessionController};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn prompt(label: &str) -> std::io::Result<()> {
    print!("{}", label);
    std::io::stdout().flush()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Logs go to stderr so they don't interleave with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AgentConfig::from_env()?;
    let controller = SessionController::from_config(&config)?;
    info!("Gold investment agent initialized");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("🟡 Welcome to the Gold Investment AI Agent!");
    prompt("👤 Please enter your name to begin: ")?;
    let user_name = match lines.next_line().await? {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        Some(_) => "User".to_string(),
        None => return Ok(()),
    };
    // Each terminal run is its own conversation
    let user_id = format!("terminal-{}", uuid::Uuid::new_v4());

    println!(
        "\nHello {}! Ask anything about gold investment, digital gold, or current prices.",
        user_name
    );
    println!("If you want to buy gold, just say so, e.g., 'I want to buy gold.'\n");

    loop {
        prompt(&format!("{}: ", user_name))?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if matches!(message.to_lowercase().as_str(), "quit" | "exit") {
            break;
        }

        match controller.chat(&user_id, message, Some(&user_name)).await {
            Ok(outcome) => {
                println!("🤖 {}", outcome.reply);
                if outcome.success() {
                    println!("💡 You can type 'exit' to quit or ask about gold again.\n");
                }
            }
            Err(e) => {
                error!("Turn failed: {}", e);
                println!("🤖 Sorry, I couldn't reach the assistant just now. Please try again.");
            }
        }
    }

    println!("👋 Thank you for using the Gold Investment AI Agent. Stay golden!");
    Ok(())
}
