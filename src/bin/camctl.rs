//! Camera control client.
//!
//! Talks to the frame receiver's control channel over TCP, sending JSON
//! command envelopes and pretty-printing the replies. Configuration values
//! can be given as `key=value` for strings or `key:=value` for raw JSON
//! (numbers, booleans, arrays).

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};

use pco_camlink::ipc::IpcMessage;

#[derive(Parser)]
#[command(name = "camctl", about = "Control a PCO camera frame receiver")]
struct Cli {
    /// Control channel endpoint.
    #[arg(long, default_value = "127.0.0.1:5060")]
    ctrl: String,

    #[command(subcommand)]
    command: CtlCommand,
}

#[derive(Subcommand)]
enum CtlCommand {
    /// Connect to the camera.
    Connect,
    /// Disconnect from the camera.
    Disconnect,
    /// Arm the camera.
    Arm,
    /// Disarm the camera.
    Disarm,
    /// Start frame acquisition.
    Start,
    /// Stop frame acquisition.
    Stop,
    /// Reset the camera error condition.
    Reset,
    /// Get the camera controller status.
    Status,
    /// Set camera configuration parameters, or request the current
    /// configuration when none are given.
    Config {
        /// JSON file of configuration parameters to send.
        #[arg(short, long)]
        json: Option<PathBuf>,

        /// key=value (string) or key:=value (raw JSON) parameters.
        vals: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let request = match &cli.command {
        CtlCommand::Connect => camera_command("connect"),
        CtlCommand::Disconnect => camera_command("disconnect"),
        CtlCommand::Arm => camera_command("arm"),
        CtlCommand::Disarm => camera_command("disarm"),
        CtlCommand::Start => camera_command("start"),
        CtlCommand::Stop => camera_command("stop"),
        CtlCommand::Reset => camera_command("reset"),
        CtlCommand::Status => IpcMessage::cmd("status", 1, None),
        CtlCommand::Config { json, vals } => config_request(json.as_deref(), vals)?,
    };

    let reply = send_request(&cli.ctrl, &request)?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

fn camera_command(name: &str) -> IpcMessage {
    IpcMessage::cmd("configure", 1, Some(json!({ "command": name })))
}

fn config_request(json_path: Option<&std::path::Path>, vals: &[String]) -> Result<IpcMessage> {
    let mut camera = Map::new();

    if let Some(path) = json_path {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let doc: Value = serde_json::from_str(&contents)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        match doc {
            Value::Object(map) => camera.extend(map),
            _ => bail!("configuration file must contain a JSON object"),
        }
    }

    for val in vals {
        let (key, value) = parse_keyval(val)?;
        camera.insert(key, value);
    }

    if camera.is_empty() {
        Ok(IpcMessage::cmd("request_configuration", 1, None))
    } else {
        Ok(IpcMessage::cmd(
            "configure",
            1,
            Some(json!({ "camera": Value::Object(camera) })),
        ))
    }
}

/// Split `key=value` into a string parameter or `key:=value` into a raw
/// JSON parameter.
fn parse_keyval(input: &str) -> Result<(String, Value)> {
    if let Some((key, raw)) = input.split_once(":=") {
        let value: Value = serde_json::from_str(raw)
            .with_context(|| format!("invalid JSON value in {input:?}"))?;
        return Ok((key.to_string(), value));
    }
    if let Some((key, value)) = input.split_once('=') {
        return Ok((key.to_string(), Value::String(value.to_string())));
    }
    bail!("parameter {input:?} is not in key=value or key:=value form");
}

fn send_request(endpoint: &str, request: &IpcMessage) -> Result<IpcMessage> {
    let stream = TcpStream::connect(endpoint)
        .with_context(|| format!("failed to connect to {endpoint}"))?;
    let mut writer = stream.try_clone().context("failed to clone stream")?;
    let mut reader = BufReader::new(stream);

    writer.write_all(request.encode()?.as_bytes())?;
    writer.write_all(b"\n")?;

    let mut line = String::new();
    reader.read_line(&mut line).context("failed to read reply")?;
    if line.trim().is_empty() {
        bail!("connection closed without a reply");
    }
    Ok(IpcMessage::parse(line.trim())?)
}
