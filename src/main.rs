use log::{error, info};
use std::sync::Arc;
use std::thread;

use pingate::{AppConfig, InterruptController, PinMap, SysfsBackend};

fn main() {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PINGATE_CONFIG").ok())
        .unwrap_or_else(|| "pingate.json".to_string());
    let config = AppConfig::load_from_file(&config_path)
        .unwrap_or_else(|e| panic!("Failed to load config: {e}"));

    let pins = PinMap::new(config.board.revision);
    let backend = Arc::new(SysfsBackend::new(&config.sysfs));
    let controller = InterruptController::new(backend, config.board.watcher_priority);

    let mut watching = 0;
    for watch in &config.watch {
        let pin = watch.pin;
        let line = match pins.resolve(pin) {
            Ok(line) => line,
            Err(e) => {
                error!("skipping watch entry: {e}");
                continue;
            }
        };
        let mut count: u64 = 0;
        let attached = controller.attach(line, watch.edge, move || {
            count += 1;
            info!("pin {pin} (line {line}): edge #{count}");
        });
        match attached {
            Ok(()) => watching += 1,
            Err(e) => error!("cannot watch pin {pin}: {e}"),
        }
    }

    if watching == 0 {
        panic!("Config error: no pin could be watched");
    }

    info!(
        "Watching {watching} pin(s) under {}...",
        config.sysfs.root.display()
    );

    loop {
        thread::park();
    }
}
