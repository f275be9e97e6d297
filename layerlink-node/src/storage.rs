//! Persisted subscribed-layer: one small file with one value.

use std::io;
use std::path::{Path, PathBuf};

use layerlink_core::Layer;

const LAYER_FILE: &str = "layer";

fn layer_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LAYER_FILE)
}

/// Load the persisted layer; a missing or unreadable file yields the default
/// (`"-"`, first boot).
pub fn load_layer(state_dir: &Path) -> Layer {
    match std::fs::read(layer_path(state_dir)) {
        Ok(bytes) => {
            let text: Vec<u8> =
                bytes.into_iter().take_while(|&b| b != 0 && b != b'\n').collect();
            let layer = Layer::new(&text);
            log::info!("loaded layer '{layer}'");
            layer
        }
        Err(_) => {
            log::info!("no saved layer found (first boot), using default");
            Layer::default()
        }
    }
}

/// Persist the layer, creating the state directory on first use.
pub fn save_layer(state_dir: &Path, layer: Layer) -> io::Result<()> {
    std::fs::create_dir_all(state_dir)?;
    std::fs::write(layer_path(state_dir), layer.as_str().as_bytes())?;
    log::info!("layer '{layer}' saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("layerlink-test-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = temp_dir("missing");
        assert_eq!(load_layer(&dir), Layer::default());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = temp_dir("roundtrip");
        save_layer(&dir, Layer::new(b"BETA")).unwrap();
        assert_eq!(load_layer(&dir), Layer::new(b"BETA"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
