// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use nalgebra::Rotation3;

use teleop::teleop::control_tools::{prepare_tick_thread, RealtimeConfig};
use teleop::{ControlHandle, ControlLoop, DeviceSample, TeleopResult, TeleopSystem, BUTTON_1, BUTTON_2};

/// Teleoperates both arms with simulated stylus devices. The stylus of each device moves on a
/// small circle; the buttons are driven by commands read from standard input.
#[derive(Parser, Debug)]
#[clap(author, version, name = "dual_arm_teleop")]
struct CommandLineArguments {
    /// Configuration file, defaults to $TELEOP_CONFIG or config.toml
    pub config: Option<PathBuf>,
    /// Run the tick threads with realtime priority. Fails without a realtime kernel.
    #[clap(long)]
    pub realtime: bool,
    /// Tick rate of the simulated devices in Hz
    #[clap(long, default_value = "1000")]
    pub tick_rate: u32,
    /// Radius of the simulated stylus circle in mm
    #[clap(long, default_value = "20")]
    pub radius: f64,
}

/// Button state of one simulated device, written by the command reader.
#[derive(Default)]
struct SimulatedButtons {
    held: AtomicU32,
    end_effector_pulse: AtomicBool,
}

impl SimulatedButtons {
    fn toggle_drag(&self) -> bool {
        self.held.fetch_xor(BUTTON_1, Ordering::SeqCst) & BUTTON_1 == 0
    }

    fn next(&self) -> u32 {
        let mut buttons = self.held.load(Ordering::SeqCst);
        if self.end_effector_pulse.swap(false, Ordering::SeqCst) {
            buttons |= BUTTON_2;
        }
        buttons
    }
}

fn simulated_sample(elapsed: f64, radius: f64, buttons: u32) -> DeviceSample {
    let angle = elapsed * 0.5;
    let rotation = Rotation3::from_euler_angles(0.1 * angle.sin(), 0., 0.2 * angle.cos());
    let mut transform = [0.; 16];
    transform.copy_from_slice(rotation.to_homogeneous().as_slice());
    DeviceSample {
        position: [radius * angle.cos(), radius * angle.sin(), 0.],
        transform,
        buttons,
        max_continuous_force: 3.,
    }
}

fn run_ticks(
    mut control_loop: ControlLoop,
    buttons: Arc<SimulatedButtons>,
    running: Arc<AtomicBool>,
    args: Arc<CommandLineArguments>,
) -> TeleopResult<()> {
    prepare_tick_thread(if args.realtime {
        RealtimeConfig::Enforce
    } else {
        RealtimeConfig::Ignore
    })?;
    let period = Duration::from_secs_f64(1. / f64::from(args.tick_rate.max(1)));
    let start = Instant::now();
    let mut next_tick = start;
    while running.load(Ordering::SeqCst) {
        let sample = simulated_sample(start.elapsed().as_secs_f64(), args.radius, buttons.next());
        let force = control_loop.tick(&sample);
        log::trace!("[{}] force {:?}", control_loop.name(), force);
        next_tick += period;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }
    }
    Ok(())
}

fn print_help() {
    println!("commands (one per line):");
    println!("  1 | 2   select device");
    println!("  d       press / release the drag button of the selected device");
    println!("  g       click the end-effector button of the selected device");
    println!("  + | -   position scale up / down");
    println!("  ] | [   rotation scale up / down");
    println!("  }} | {{   stiffen / soften the spring");
    println!("  s       query arm state");
    println!("  f       toggle teach frame (base / tool)");
    println!("  m       show axis mapping");
    println!("  c       save configuration");
    println!("  h       help");
    println!("  q       quit");
}

fn query(handle: &ControlHandle) {
    match handle.query_arm_state() {
        Ok(status) => {
            println!("[{}] arm pose {}", handle.name(), status.pose);
            println!("[{}] dragging: {}", handle.name(), status.dragging);
            if let Some(anchor) = status.anchor {
                println!(
                    "[{}] device anchor {:?}, arm anchor {:?}",
                    handle.name(),
                    anchor.device.position,
                    anchor.arm
                );
            }
        }
        Err(e) => eprintln!("[{}] {}", handle.name(), e),
    }
}

fn main() -> TeleopResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Arc::new(CommandLineArguments::parse());
    let system = TeleopSystem::open(args.config.as_deref())?;
    let (loops, mut handles) = system.split();

    let running = Arc::new(AtomicBool::new(true));
    let mut devices = Vec::new();
    let mut workers = Vec::new();
    for control_loop in loops {
        let buttons = Arc::new(SimulatedButtons::default());
        devices.push(buttons.clone());
        let running = running.clone();
        let args = args.clone();
        workers.push(thread::spawn(move || {
            run_ticks(control_loop, buttons, running, args)
        }));
    }

    print_help();
    let mut selected = 0;
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("{}", e);
                break;
            }
        };
        let handle = &mut handles[selected];
        match line.trim() {
            "q" | "Q" => break,
            "1" => selected = 0,
            "2" => selected = 1,
            "d" | "D" => {
                let held = devices[selected].toggle_drag();
                println!("[{}] drag button {}", handle.name(), if held { "held" } else { "released" });
            }
            "g" | "G" => devices[selected]
                .end_effector_pulse
                .store(true, Ordering::SeqCst),
            "+" | "=" => println!("position scale {}", handle.adjust_position_scale(1)),
            "-" | "_" => println!("position scale {}", handle.adjust_position_scale(-1)),
            "]" => println!("rotation scale {:.2}", handle.adjust_rotation_scale(1)),
            "[" => println!("rotation scale {:.2}", handle.adjust_rotation_scale(-1)),
            "}" => println!("spring stiffness {:.3}", handle.stiffen_spring()),
            "{" => println!("spring stiffness {:.3}", handle.soften_spring()),
            "s" | "S" => query(handle),
            "f" | "F" => {
                for handle in handles.iter_mut() {
                    match handle.toggle_teach_frame() {
                        Ok(frame) => println!("[{}] teach frame {:?}", handle.name(), frame),
                        Err(e) => eprintln!("[{}] {}", handle.name(), e),
                    }
                }
            }
            "m" | "M" => {
                for handle in handles.iter() {
                    println!("{}", handle.describe_mapping());
                }
            }
            "c" | "C" => {
                if let Err(e) = handle.save_config() {
                    eprintln!("{}", e);
                }
            }
            "h" | "H" => print_help(),
            "" => {}
            other => println!("unknown command {:?}, h for help", other),
        }
    }

    running.store(false, Ordering::SeqCst);
    for worker in workers {
        match worker.join() {
            Ok(Err(e)) => eprintln!("{}", e),
            Err(_) => eprintln!("tick thread panicked"),
            Ok(Ok(())) => {}
        }
    }
    Ok(())
}
