use bcm::codec::{encode_frame, id, CanFrame, TxCounter};
use bcm::subsystems::{DoorCommand, HeadlightCommand, InteriorMode, LightingCommand, TurnCommand};
use bcm::{BcmConfig, BodyControlModule, LoopbackBus};
use clap::{App, Arg};
use colored::*;
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};

const DEFAULT_DURATION_MS: &str = "3000";
const DEFAULT_STEP_MS: &str = "10";

#[derive(Debug, Clone, Copy)]
enum Action {
    Door(DoorCommand),
    Lighting(LightingCommand),
    Turn(TurnCommand),
    Ambient(u8),
    Speed(u16),
    BulbCurrent(u16, u16),
    CorruptDoor,
    SkipDoorCounter,
}

struct Script {
    steps: Vec<(u32, Action)>,
    door: TxCounter,
    lighting: TxCounter,
    turn: TxCounter,
}

impl Script {
    fn new(steps: Vec<(u32, Action)>) -> Self {
        Self {
            steps,
            door: TxCounter::new(),
            lighting: TxCounter::new(),
            turn: TxCounter::new(),
        }
    }

    fn frame(&mut self, action: Action) -> Option<CanFrame> {
        let encoded = match action {
            Action::Door(cmd) => encode_frame(id::DOOR_CMD, &cmd.to_bytes(), &mut self.door),
            Action::Lighting(cmd) => encode_frame(id::LIGHTING_CMD, &cmd.to_bytes(), &mut self.lighting),
            Action::Turn(cmd) => encode_frame(id::TURN_CMD, &cmd.to_bytes(), &mut self.turn),
            Action::CorruptDoor => {
                let good = encode_frame(id::DOOR_CMD, &DoorCommand::LockAll.to_bytes(), &mut self.door);
                good.and_then(|frame| {
                    let mut bytes = frame.data().to_vec();
                    bytes[3] ^= 0x5A;
                    CanFrame::new(frame.id(), &bytes)
                })
            }
            Action::SkipDoorCounter => {
                let mut skipped = TxCounter::starting_at(self.door.current().wrapping_add(3));
                encode_frame(id::DOOR_CMD, &DoorCommand::UnlockAll.to_bytes(), &mut skipped)
            }
            _ => return None,
        };
        match encoded {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("Failed to encode scripted frame: {}", e);
                None
            }
        }
    }
}

fn scenario(name: &str) -> Vec<(u32, Action)> {
    match name {
        "door" => vec![
            (0, Action::Door(DoorCommand::LockAll)),
            (500, Action::Door(DoorCommand::UnlockSingle(0))),
            (1000, Action::Door(DoorCommand::UnlockAll)),
            (1500, Action::Speed(20)),
            (2500, Action::Speed(0)),
        ],
        "lighting" => vec![
            (
                0,
                Action::Lighting(LightingCommand {
                    headlight: HeadlightCommand::Auto,
                    interior: InteriorMode::On,
                    brightness: 8,
                }),
            ),
            (200, Action::Ambient(50)),
            (1200, Action::Ambient(100)),
            (2000, Action::Ambient(200)),
        ],
        "turn" => vec![
            (0, Action::BulbCurrent(450, 450)),
            (0, Action::Turn(TurnCommand::Left)),
            (1500, Action::BulbCurrent(40, 450)),
            (2500, Action::Turn(TurnCommand::Off)),
        ],
        "hazard" => vec![
            (0, Action::Turn(TurnCommand::HazardOn)),
            (2000, Action::Turn(TurnCommand::HazardOff)),
        ],
        "malformed" => vec![
            (0, Action::Door(DoorCommand::LockAll)),
            (100, Action::CorruptDoor),
            (200, Action::SkipDoorCounter),
            (300, Action::Door(DoorCommand::LockSingle(7))),
        ],
        _ => Vec::new(),
    }
}

fn print_frame(now: u32, frame: &CanFrame, format: &str) {
    if format == "json" {
        match serde_json::to_string(frame) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("Failed to serialize frame: {}", e),
        }
        return;
    }

    let label = match frame.id() {
        id::DOOR_STATUS => "DoorStatus".bright_cyan(),
        id::LIGHTING_STATUS => "LightingStatus".bright_yellow(),
        id::TURN_STATUS => "TurnStatus".bright_green(),
        id::FAULT_STATUS => "FaultStatus".bright_red(),
        id::HEARTBEAT => "Heartbeat".dimmed(),
        _ => "Unknown".normal(),
    };
    let bytes: Vec<String> = frame.data().iter().map(|b| format!("{:02X}", b)).collect();
    println!("{:>6} ms  {:#05x}  {:<15} [{}]", now, frame.id(), label, bytes.join(" "));
}

fn load_config(path: Option<&str>) -> Result<BcmConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(BcmConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("bcm-sim")
        .version("0.1.0")
        .author("Body Electronics Team")
        .about("Replays scripted CAN traffic against the body control module")
        .arg(
            Arg::with_name("scenario")
                .short("s")
                .long("scenario")
                .value_name("NAME")
                .help("Scenario to replay")
                .takes_value(true)
                .possible_values(&["door", "lighting", "turn", "hazard", "malformed"])
                .default_value("door"),
        )
        .arg(
            Arg::with_name("duration")
                .short("d")
                .long("duration")
                .value_name("MS")
                .help("Simulated run time in milliseconds")
                .takes_value(true)
                .default_value(DEFAULT_DURATION_MS),
        )
        .arg(
            Arg::with_name("step")
                .long("step")
                .value_name("MS")
                .help("Scheduler step in milliseconds")
                .takes_value(true)
                .default_value(DEFAULT_STEP_MS),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON calibration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["table", "json"])
                .default_value("table"),
        )
        .arg(
            Arg::with_name("realtime")
                .long("realtime")
                .help("Pace the simulation with the wall clock"),
        )
        .get_matches();

    let scenario_name = matches.value_of("scenario").unwrap_or("door");
    let duration: u32 = matches.value_of("duration").unwrap_or(DEFAULT_DURATION_MS).parse()?;
    let step: u32 = matches.value_of("step").unwrap_or(DEFAULT_STEP_MS).parse()?;
    let format = matches.value_of("format").unwrap_or("table");
    let realtime = matches.is_present("realtime");
    let config = load_config(matches.value_of("config"))?;

    if step == 0 {
        return Err("step must be at least 1 ms".into());
    }

    let mut module = BodyControlModule::new(LoopbackBus::new(), config)?;
    let mut script = Script::new(scenario(scenario_name));
    script.steps.sort_by_key(|(at, _)| *at);
    let mut next_step = 0;

    if format == "table" {
        println!("{}", "Body Control Module Simulator".bright_blue().bold());
        println!("{} {} ({} ms)", "Scenario:".bright_white(), scenario_name, duration);
    }
    info!(scenario = scenario_name, duration, step, "simulation starting");

    let mut interval = time::interval(Duration::from_millis(u64::from(step)));
    let mut now: u32 = 0;

    while now <= duration {
        if realtime {
            interval.tick().await;
        }

        while let Some(&(at, action)) = script.steps.get(next_step) {
            if at > now {
                break;
            }
            next_step += 1;

            match action {
                Action::Ambient(level) => module.set_ambient_light(level, now),
                Action::Speed(kmh) => module.update_vehicle_speed(kmh, now),
                Action::BulbCurrent(left, right) => module.update_bulb_current(left, right),
                _ => {
                    if let Some(frame) = script.frame(action) {
                        if let Err(e) = module.bus_mut().inject(frame) {
                            warn!("Inbound frame dropped: {}", e);
                        }
                    }
                }
            }
        }

        module.process(now);
        for frame in module.bus_mut().take_sent() {
            print_frame(now, &frame, format);
        }
        now += step;
    }

    let snapshot = module.snapshot();
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        let stats = snapshot.stats;
        println!();
        println!("{} {:?}", "Final state:".bright_white(), snapshot.state);
        println!(
            "{} received {}, accepted {}, rejected {}, sent {}, tx failures {}",
            "Frames:".bright_white(),
            stats.frames_received,
            stats.frames_dispatched.to_string().bright_green(),
            stats.frames_rejected.to_string().bright_red(),
            stats.frames_sent,
            stats.tx_failures
        );
        for record in &snapshot.faults {
            println!(
                "  {} {:#06x} {:?} x{}",
                "fault".yellow(),
                record.code,
                record.status,
                record.occurrence_count
            );
        }
    }

    Ok(())
}
