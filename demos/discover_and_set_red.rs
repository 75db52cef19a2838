//! Discover all DoHome lights on the network and set them to red.
//!
//! This example demonstrates:
//! - Discovery of DoHome devices on the local network
//! - Setting every discovered light to red with one group frame
//!
//! Run with: cargo run --example discover_and_set_red

use dohome_rs::{ClientConfig, Color, Gateway};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Discovering DoHome lights on the network...");

    let gateway = Gateway::bind(ClientConfig::default()).await?;
    let sessions = gateway.discover().await?;

    if sessions.is_empty() {
        println!("No lights found on the network.");
        return Ok(());
    }

    println!("Found {} light(s):", sessions.len());
    let mut identifiers = Vec::new();
    for session in &sessions {
        let sid = session.identifier().unwrap_or_default();
        println!("  - IP: {}, SID: {}", session.address().ip(), sid);
        identifiers.push(sid);
    }

    // Accept the result as long as one light confirms
    let group = gateway.add_group_with_quorum(&identifiers, 1).await?;

    println!("\nSetting all lights to red...");
    match gateway.set_rgb(&group, Color::rgb(255, 0, 0), 255).await {
        Ok(_) => println!("  ✓ Lights set to red"),
        Err(e) => eprintln!("  ✗ Failed to set lights to red: {}", e),
    }

    for session in &sessions {
        let status = if session.is_connected() { "confirmed" } else { "no reply" };
        println!("  {}: {}", session.address().ip(), status);
    }

    println!("\nDone!");
    Ok(())
}
