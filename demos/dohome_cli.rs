//! CLI application for controlling DoHome lights.
//!
//! Run with: cargo run --example dohome_cli -- --help

use clap::{Parser, Subcommand};
use dohome_rs::{
    ClientConfig, Color, ColorTemperature, DeviceSession, LightMode, UdpTransport,
    discover_devices,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dohome-cli")]
#[command(about = "Control DoHome smart lights from the command line", long_about = None)]
struct Cli {
    /// IP address of the DoHome light (not required for discover command)
    #[arg(short, long, global = true)]
    ip: Option<IpAddr>,

    /// Device identifier; resolved with a ping when omitted
    #[arg(short, long, global = true)]
    sid: Option<String>,

    /// Reply timeout in milliseconds
    #[arg(long, global = true, default_value = "500")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover all DoHome lights on the network
    Discover {
        /// Discovery window in seconds (default: 3)
        #[arg(short, long, default_value = "3")]
        window: u64,
    },

    /// Get the current state of the light
    Status,

    /// Turn the light on, restoring its last lit state
    On,

    /// Turn the light off
    Off,

    /// Set RGB color (0-255 for each component)
    Color {
        /// Red component (0-255)
        red: u8,
        /// Green component (0-255)
        green: u8,
        /// Blue component (0-255)
        blue: u8,
        /// Brightness (0-255)
        #[arg(short, long, default_value = "255")]
        brightness: u8,
    },

    /// Set white output
    White {
        /// Color temperature, 0 coldest to 255 warmest
        #[arg(default_value = "128")]
        temperature: u8,
        /// Brightness (0-255)
        #[arg(short, long, default_value = "255")]
        brightness: u8,
    },

    /// Get detailed diagnostics
    Diagnostics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = ClientConfig::default().with_command_timeout(Duration::from_millis(cli.timeout));
    let transport = Arc::new(UdpTransport::bind_any().await?);

    match cli.command {
        Commands::Discover { window } => {
            println!(
                "Discovering DoHome lights on the network (window: {}s)...",
                window
            );

            let config = config.with_discovery_timeout(Duration::from_secs(window));
            match discover_devices(transport.as_ref(), &config).await {
                Ok(devices) => {
                    if devices.is_empty() {
                        println!("No lights found on the network.");
                    } else {
                        println!("\nFound {} light(s):", devices.len());
                        for device in devices {
                            println!(
                                "  IP: {:15}  SID: {}  Name: {}",
                                device.address.ip().to_string(),
                                device.sid,
                                device.name
                            );
                        }
                    }
                }
                Err(e) => eprintln!("Error during discovery: {}", e),
            }
        }

        _ => {
            // All other commands require an IP address
            let ip = cli.ip.ok_or("IP address is required for this command. Use --ip <IP>")?;
            let address = config.device_address(ip);
            let light = match cli.sid.as_deref() {
                Some(sid) => DeviceSession::with_identifier(address, sid, transport, config)?,
                None => DeviceSession::new(address, transport, config),
            };

            match cli.command {
                Commands::Discover { .. } => unreachable!(),

                Commands::Status => {
                    println!("Getting state for light at {}...", ip);
                    match light.get_state().await {
                        Ok(state) => {
                            println!("\nLight State:");
                            println!("  Power: {}", if state.enabled() { "ON" } else { "OFF" });
                            if state.enabled() {
                                println!("  Mode: {}", state.mode());
                                match state.mode() {
                                    LightMode::Rgb => {
                                        let color = state.color();
                                        println!(
                                            "  Color: RGB({}, {}, {})",
                                            color.red(),
                                            color.green(),
                                            color.blue()
                                        );
                                    }
                                    LightMode::White => println!(
                                        "  Temperature: {}",
                                        state.color_temperature().value()
                                    ),
                                }
                                println!("  Brightness: {}", state.brightness());
                            }
                        }
                        Err(e) => eprintln!("Error getting state: {}", e),
                    }
                }

                Commands::On => {
                    println!("Turning light ON at {}...", ip);
                    match light.turn_on().await {
                        Ok(_) => println!("Light turned ON"),
                        Err(e) => eprintln!("Error: {}", e),
                    }
                }

                Commands::Off => {
                    println!("Turning light OFF at {}...", ip);
                    match light.turn_off().await {
                        Ok(_) => println!("Light turned OFF"),
                        Err(e) => eprintln!("Error: {}", e),
                    }
                }

                Commands::Color {
                    red,
                    green,
                    blue,
                    brightness,
                } => {
                    println!(
                        "Setting color to RGB({}, {}, {}) at {}...",
                        red, green, blue, ip
                    );
                    match light.set_rgb(Color::rgb(red, green, blue), brightness).await {
                        Ok(_) => println!("Color set successfully"),
                        Err(e) => eprintln!("Error: {}", e),
                    }
                }

                Commands::White {
                    temperature,
                    brightness,
                } => {
                    println!("Setting white {} at {}...", temperature, ip);
                    match light
                        .set_white(ColorTemperature::new(temperature), brightness)
                        .await
                    {
                        Ok(_) => println!("White set successfully"),
                        Err(e) => eprintln!("Error: {}", e),
                    }
                }

                Commands::Diagnostics => {
                    println!("Getting diagnostics for light at {}...", ip);
                    if let Err(e) = light.get_state().await {
                        eprintln!("Error reaching light: {}", e);
                    }
                    let diag = light.diagnostics().await;
                    println!("\nDiagnostics:\n{}", serde_json::to_string_pretty(&diag)?);
                }
            }
        }
    }

    Ok(())
}
