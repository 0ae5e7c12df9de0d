//! Scene files on disk
//!
//! Saves are atomic: the scene is written to `<file>.tmp`, the previous save
//! is kept as `<file>.bak`, then the temp file is renamed into place. A
//! failed load never touches the caller's scene.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PersistError, Warning};
use crate::sim::Scene;

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Write `scene` to `path` via a temp file, keeping one backup.
pub fn save_scene(path: impl AsRef<Path>, scene: &Scene) -> Result<(), PersistError> {
    let path = path.as_ref();
    let tmp = sibling(path, "tmp");
    fs::write(&tmp, scene.serialize())?;

    if path.exists() {
        fs::copy(path, sibling(path, "bak"))?;
    }
    fs::rename(&tmp, path)?;

    log::info!(
        "Saved {:?} ({} entities) to {}",
        scene.name,
        scene.len(),
        path.display()
    );
    Ok(())
}

/// Read and parse a scene file.
pub fn load_scene(path: impl AsRef<Path>) -> Result<(Scene, Vec<Warning>), PersistError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let (scene, warnings) = Scene::deserialize_with_warnings(&text)?;
    for warning in &warnings {
        log::warn!("{}: {warning}", path.display());
    }
    log::info!("Loaded {:?} from {}", scene.name, path.display());
    Ok((scene, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;

    use crate::error::SceneError;
    use crate::sim::{BallDescriptor, BlockDescriptor};

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "marble-machine-{}-{name}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample() -> Scene {
        let mut scene = Scene::new("saved");
        scene.append(BallDescriptor::new(Vec2::new(10.0, 20.0), 12.0)).unwrap();
        scene.append(BlockDescriptor::new(Vec2::new(10.0, 80.0), 64)).unwrap();
        scene
    }

    #[test]
    fn test_save_then_load() {
        let dir = scratch("roundtrip");
        let path = dir.join("scene.json");

        save_scene(&path, &sample()).unwrap();
        let (loaded, warnings) = load_scene(&path).unwrap();

        assert_eq!(loaded, sample());
        assert!(warnings.is_empty());
        assert!(!sibling(&path, "tmp").exists());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_overwrite_keeps_backup() {
        let dir = scratch("backup");
        let path = dir.join("scene.json");

        save_scene(&path, &Scene::new("first")).unwrap();
        save_scene(&path, &sample()).unwrap();

        let (current, _) = load_scene(&path).unwrap();
        let (backup, _) = load_scene(sibling(&path, "bak")).unwrap();
        assert_eq!(current.name, "saved");
        assert_eq!(backup.name, "first");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_load_errors() {
        let dir = scratch("errors");
        let missing = load_scene(dir.join("nope.json"));
        assert!(matches!(missing, Err(PersistError::Io(_))));

        let bad = dir.join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(
            load_scene(&bad),
            Err(PersistError::Scene(SceneError::Json(_)))
        ));
        fs::remove_dir_all(dir).unwrap();
    }
}
