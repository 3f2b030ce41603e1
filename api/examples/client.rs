use reqwest::Client;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new();
    let base_url = std::env::var("POLIBOT_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string());

    println!("Testing HR policy assistant at {}", base_url);

    println!("\nHealth check:");
    let health_response = client.get(format!("{}/health", base_url)).send().await?;
    println!("Status: {}", health_response.status());
    let health_json: serde_json::Value = health_response.json().await?;
    println!("Response: {}", serde_json::to_string_pretty(&health_json)?);

    println!("\nStarting a chat session:");
    let session: serde_json::Value = client
        .post(format!("{}/sessions", base_url))
        .json(&json!({ "user_id": "demo-user" }))
        .send()
        .await?
        .json()
        .await?;
    let session_id = session["session_id"].as_str().unwrap_or_default().to_string();
    println!("Session: {}", session_id);

    for question in [
        "How many days of paid annual leave do employees get?",
        "Can unused days be carried forward?",
    ] {
        println!("\nYou: {}", question);
        let turn_response = client
            .post(format!("{}/sessions/{}/messages", base_url, session_id))
            .json(&json!({ "content": question }))
            .send()
            .await?;
        println!("Status: {}", turn_response.status());
        let turn: serde_json::Value = turn_response.json().await?;
        println!("Assistant: {}", turn["answer"].as_str().unwrap_or_default());
        if let Some(sources) = turn["sources"].as_array() {
            for source in sources {
                println!("  - {} page {}", source["document"], source["page"]);
            }
        }
    }

    println!("\nStateless query:");
    let query_response = client
        .post(format!("{}/query", base_url))
        .json(&json!({
            "query": "What is the notice period for confirmed employees?",
            "max_results": 3
        }))
        .send()
        .await?;
    println!("Status: {}", query_response.status());
    let query_json: serde_json::Value = query_response.json().await?;
    println!("Response: {}", serde_json::to_string_pretty(&query_json)?);

    println!("\nClient test completed");
    Ok(())
}
