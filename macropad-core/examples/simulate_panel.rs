//! Example: drive the whole core against an in-memory panel.
//!
//! Run with: `RUST_LOG=debug cargo run --example simulate_panel`

use macropad_core::{
    ButtonEvent, Category, LedPattern, MockLink, Outcome, Panel, PanelConfig, PanelError,
    PanelInput, ResourceRef, Timers, Transition,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> Result<(), PanelError> {
    env_logger::init();

    // Short timers so the whole script runs in a few seconds.
    let config = PanelConfig::default()
        .with_timers(Timers {
            detail: Duration::from_millis(800),
            confirmation: Duration::from_millis(600),
            sleep_idle: Duration::from_secs(2),
        })
        .with_tick_interval(Duration::from_millis(100));

    let link = Arc::new(MockLink::new());
    let panel = Panel::start(link.clone(), &config, &[0u8; 4096])?;

    // A finger on the panel: bouncy presses with echoes mixed in.
    let finger = link.clone();
    let script = thread::spawn(move || {
        // poop, "formed", undo, pee, sleep, a stray key, wake, then poop
        // again left to the detail timer.
        let presses = [
            (12, 300),
            (13, 200),
            (1, 300),
            (7, 1500),
            (13, 500),
            (4, 500),
            (13, 1500),
            (12, 2500),
        ];
        for (key, pause) in presses {
            for _ in 0..8 {
                finger.push_button(ButtonEvent::pressed(key));
                finger.push_echo();
            }
            finger.push_button(ButtonEvent::released(key));
            thread::sleep(Duration::from_millis(pause));
        }
    });

    let stop_at = Instant::now() + Duration::from_secs(9);
    let mut next_record = 0;

    for input in panel.inputs() {
        match input {
            PanelInput::Press(press) => {
                panel.led().request(LedPattern::acknowledge());
                let outcome = panel.state().handle_key(press.key, press.at);
                for fired in &outcome.expired {
                    println!("  (timer) {:?}", fired);
                }
                println!(
                    "key {:>2} on {:<13} -> {:?}",
                    press.key,
                    outcome.mode.as_str(),
                    outcome.transition
                );

                match outcome.transition {
                    Transition::Confirmed { id, outcome } => {
                        if let Outcome::Action { .. } = outcome {
                            next_record += 1;
                            let resource = ResourceRef::new("events", next_record.to_string());
                            panel.state().attach_resource(id, resource);
                            panel.led().request(LedPattern::success(Category::Diaper));
                        } else {
                            panel.led().request(LedPattern::wake());
                        }
                    }
                    Transition::SleepStarted => {
                        panel.led().request(LedPattern::sleep_start());
                    }
                    Transition::Undo { resource } => {
                        println!("  undo {}", resource);
                        panel.led().request(LedPattern::undo());
                    }
                    _ => {}
                }
            }
            PanelInput::Tick(at) => {
                for fired in panel.state().tick(at) {
                    if !matches!(fired, Transition::Refresh(_)) {
                        println!("tick -> {:?}", fired);
                    }
                }
                if at >= stop_at {
                    break;
                }
            }
        }
    }

    let _ = script.join();
    let health = panel.health();
    println!(
        "{} frames written, recent actions: {:?}",
        health.frames_written,
        panel.state().recent_actions()
    );
    panel.shutdown();
    Ok(())
}
