//! Marble Machine - headless runner
//!
//! `marble-machine <scene.json> [ticks] [settings.json]`
//!
//! Loads a scene, runs it for `ticks` fixed steps (default 600, ten seconds)
//! and prints every note played plus the final entity positions.

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    env_logger::init();
    if let Err(e) = native::run() {
        log::error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::cell::RefCell;
    use std::rc::Rc;

    use marble_machine::{NodeTable, NoteLog, Settings, SimError, Simulation, persistence};

    const DEFAULT_TICKS: u64 = 600;

    pub fn run() -> Result<(), SimError> {
        let mut args = std::env::args().skip(1);
        let scene_path = args
            .next()
            .unwrap_or_else(|| marble_machine::consts::SCENE_FILE_NAME.to_string());
        let ticks = match args.next() {
            Some(arg) => arg.parse().unwrap_or_else(|_| {
                log::warn!("Invalid tick count {arg:?}, using {DEFAULT_TICKS}");
                DEFAULT_TICKS
            }),
            None => DEFAULT_TICKS,
        };
        let settings = match args.next() {
            Some(path) => Settings::load_from(path),
            None => Settings::default(),
        };

        log::info!("Marble Machine (native) starting...");
        let (scene, warnings) = persistence::load_scene(&scene_path)?;
        for warning in &warnings {
            println!("warning: {warning}");
        }

        let nodes = NodeTable::shared();
        let notes = NoteLog::new();
        let timestep = settings.timestep;
        let mut sim = Simulation::with_rapier(
            settings,
            nodes.clone(),
            Rc::new(RefCell::new(notes.clone())),
            &scene,
        )?;

        // Step one tick at a time so notes can be stamped
        let mut printed = 0;
        for _ in 0..ticks {
            sim.tick(1)?;
            for note in &notes.notes()[printed..] {
                println!(
                    "tick {:>6} ({:>7.3}s)  note {:>3}  velocity {:>3}",
                    sim.current_tick(),
                    sim.current_tick() as f32 * timestep,
                    note.pitch,
                    note.velocity
                );
            }
            printed = notes.len();
        }

        println!(
            "\n{:?}: {} entities after {} ticks, {} notes",
            scene.name,
            sim.entity_count(),
            sim.current_tick(),
            notes.len()
        );
        for (index, position) in sim.positions().iter().enumerate() {
            println!("  #{index:<3} ({:>9.2}, {:>9.2})", position.x, position.y);
        }
        log::debug!("{} visual nodes attached", nodes.borrow().len());
        Ok(())
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // WASM entry point is web::start, this is just to satisfy the compiler
}
