//! Browser entry point
//!
//! JS drives the frame loop: it calls `update(dt)` from
//! `requestAnimationFrame` and reads `nodes()` back to draw. Input mapping
//! (cursor, camera, keyboard) stays on the JS side.

use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec2;
use wasm_bindgen::prelude::*;

use crate::audio::WebAudioSynth;
use crate::render::{NodeTable, VisualShape};
use crate::sandbox::Sandbox;
use crate::settings::Settings;
use crate::sim::{BallDescriptor, BlockDescriptor, Scene};

/// LocalStorage key for the autosaved scene
const SCENE_STORAGE_KEY: &str = "marble_machine_scene";

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window()?.local_storage().ok()?
}

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    // Already initialised when the module is instantiated twice
    let _ = console_log::init_with_level(log::Level::Info);
    log::info!("Marble Machine starting...");
}

#[wasm_bindgen]
pub struct WebSandbox {
    sandbox: Sandbox,
    nodes: Rc<RefCell<NodeTable>>,
    synth: Rc<RefCell<WebAudioSynth>>,
}

#[wasm_bindgen]
impl WebSandbox {
    /// Sandbox with LocalStorage settings and the last autosaved scene
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<WebSandbox, JsValue> {
        let settings = Settings::load();
        let scene = local_storage()
            .and_then(|storage| storage.get_item(SCENE_STORAGE_KEY).ok().flatten())
            .and_then(|json| match Scene::deserialize(&json) {
                Ok(scene) => Some(scene),
                Err(e) => {
                    log::warn!("Discarding saved scene: {e}");
                    None
                }
            })
            .unwrap_or_default();

        let mut synth = WebAudioSynth::new();
        synth.set_master_volume(settings.master_volume);
        synth.set_muted(settings.muted);
        let synth = Rc::new(RefCell::new(synth));
        let nodes = NodeTable::shared();

        let sandbox =
            Sandbox::new(settings, nodes.clone(), synth.clone(), scene).map_err(js_error)?;
        Ok(Self {
            sandbox,
            nodes,
            synth,
        })
    }

    /// Errors on a non-positive radius or non-finite position
    pub fn place_ball(&mut self, x: f32, y: f32, radius: f32) -> Result<(), JsValue> {
        self.sandbox
            .place(BallDescriptor::new(Vec2::new(x, y), radius))
            .map_err(js_error)
    }

    /// Errors on a pitch above 127 or a non-finite position or rotation
    pub fn place_block(&mut self, x: f32, y: f32, rotation: f32, pitch: u8) -> Result<(), JsValue> {
        let block = BlockDescriptor::new(Vec2::new(x, y), pitch).rotated(rotation);
        self.sandbox.place(block).map_err(js_error)
    }

    /// Returns false when there was nothing to undo
    pub fn undo(&mut self) -> Result<bool, JsValue> {
        let removed = self.sandbox.undo().map_err(js_error)?;
        Ok(removed.is_some())
    }

    pub fn play(&mut self) {
        // Autoplay policy: the first play is a user gesture
        self.synth.borrow().resume();
        self.sandbox.play();
    }

    pub fn pause(&mut self) {
        self.sandbox.pause();
    }

    pub fn stop(&mut self) -> Result<(), JsValue> {
        self.sandbox.stop().map_err(js_error)
    }

    pub fn is_playing(&self) -> bool {
        self.sandbox.is_playing()
    }

    /// Advance by `dt` seconds of frame time; returns steps taken
    pub fn update(&mut self, dt: f32) -> Result<u32, JsValue> {
        self.sandbox.update(dt).map_err(js_error)
    }

    pub fn current_tick(&self) -> f64 {
        self.sandbox.current_tick() as f64
    }

    /// Attached nodes as flat records of
    /// `[kind, x, y, rotation, width, height, colour]` where kind is 0 for a
    /// circle (width = radius) and 1 for a rectangle.
    pub fn nodes(&self) -> Vec<f32> {
        let nodes = self.nodes.borrow();
        let mut out = Vec::with_capacity(nodes.len() * 7);
        for (_, node) in nodes.nodes() {
            let (kind, w, h) = match node.shape {
                VisualShape::Circle { radius } => (0.0, radius, radius),
                VisualShape::Rect { width, height } => (1.0, width, height),
            };
            out.extend_from_slice(&[
                kind,
                node.position.x,
                node.position.y,
                node.rotation,
                w,
                h,
                node.colour as f32,
            ]);
        }
        out
    }

    pub fn save_text(&self) -> String {
        self.sandbox.save_text()
    }

    /// Replace the scene; the current one survives a parse error
    pub fn load_text(&mut self, text: &str) -> Result<u32, JsValue> {
        let warnings = self.sandbox.load_text(text).map_err(js_error)?;
        Ok(warnings.len() as u32)
    }

    /// Autosave the scene to LocalStorage
    pub fn save_local(&self) {
        if let Some(storage) = local_storage() {
            let _ = storage.set_item(SCENE_STORAGE_KEY, &self.sandbox.save_text());
            log::info!("Scene saved ({} entities)", self.sandbox.scene().len());
        }
    }
}
