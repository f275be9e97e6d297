// LayerLink node daemon: USB-MIDI host bridge + wireless sync fleet member.

mod config;
mod host_link;
mod mesh_clock;
mod storage;
mod wireless;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use layerlink_core::sysex;
use layerlink_core::usb::{self, SysexAssembler, UsbMidiPacket};
use layerlink_core::{Action, ErrorCode, LayerLinkCore, LogLevel, Now};
use tokio::sync::mpsc;

use crate::host_link::HostLink;
use crate::mesh_clock::{MeshClock, WallMeshClock};
use crate::wireless::WirelessDriver;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wireless task cadence.
const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Everything the MIDI task consumes: inbound USB packets from the port and
/// host-bound traffic produced by the wireless task. One queue keeps the MIDI
/// task the sole USB emitter.
enum MidiMsg {
    UsbIn(UsbMidiPacket),
    HostSysex(Vec<u8>),
    HostPacket(UsbMidiPacket),
}

fn print_help() {
    println!("layerlink-node {} — MIDI-to-wireless sync node", VERSION);
    println!();
    println!("USAGE:");
    println!("    layerlink-node [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Print this help message and exit");
    println!("    -V, --version    Print version and exit");
    println!();
    println!("DESCRIPTION:");
    println!("    Bridges a host computer (SysEx over a virtual MIDI port pair) to a");
    println!("    fleet of peer nodes over connectionless wireless datagrams. The node");
    println!("    boots as a receiver subscribed to its persisted layer; the host's");
    println!("    first query switches it into sender mode.");
    println!();
    println!("CONFIGURATION:");
    println!("    Config file (optional, first found wins):");
    println!("      ~/.config/layerlink/config.toml");
    println!("      /etc/layerlink/config.toml");
    println!();
    println!("    Example config.toml:");
    println!("      group = \"239.255.77.77\"");
    println!("      port = 45677");
    println!("      mac = \"02:11:22:33:44:55\"");
    println!();
    println!("ENVIRONMENT VARIABLES (override config file):");
    println!("    LAYERLINK_GROUP      Multicast group of the wireless link");
    println!("    LAYERLINK_PORT       UDP port of the wireless link");
    println!("    LAYERLINK_MAC        Node MAC (AA:BB:CC:DD:EE:FF)");
    println!("    LAYERLINK_STATE_DIR  Directory for the persisted layer");
    println!("    RUST_LOG             Log filter (default: info)");
    println!();
    println!("    Stop with Ctrl+C or SIGTERM.");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("layerlink-node {}", VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                eprintln!("layerlink-node: unknown option '{}'\n", other);
                print_help();
                std::process::exit(1);
            }
        }
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = buf.timestamp_millis();
            let module_path = record.module_path().unwrap_or("<unknown>");
            writeln!(buf, "[{} {:5} {}] {}", ts, record.level(), module_path, record.args())
        })
        .init();

    let cfg = config::load();
    let mac = wireless::parse_or_random_mac(cfg.mac.as_deref())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    log::info!("layerlink-node {} starting as {}", VERSION, wireless::node_name(mac));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg, mac))
}

async fn run(
    cfg: config::Config,
    mac: layerlink_core::Mac,
) -> Result<(), Box<dyn std::error::Error>> {
    let state_dir = cfg.state_dir();
    let layer = storage::load_layer(&state_dir);

    let mut core = LayerLinkCore::new(layer, 0);
    core.set_stop_on_link_lost(!cfg.freewheel_on_link_lost);

    // MIDI task inbox: USB packets from the port callback plus host-bound
    // traffic from the wireless task.
    let (midi_tx, midi_rx) = mpsc::channel::<MidiMsg>(256);
    // Complete SysEx frames assembled by the MIDI task.
    let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(64);
    // Inbound wireless datagrams, posted by the driver's receive loop.
    let (inbox_tx, inbox_rx) = mpsc::channel::<(layerlink_core::Mac, Vec<u8>)>(256);

    let name = wireless::node_name(mac);
    let port_tx = midi_tx.clone();
    let link = HostLink::open(&name, move |packet| {
        // Packets the task cannot keep up with are dropped, like any other
        // saturated link segment.
        if let Err(mpsc::error::TrySendError::Full(_)) =
            port_tx.try_send(MidiMsg::UsbIn(packet))
        {
            log::debug!("midi inbox full, dropping packet");
        }
    })?;

    // MIDI task: its own thread, tight loop over the inbox.
    let _midi_thread = std::thread::Builder::new()
        .name("midi".into())
        .spawn(move || run_midi_task(link, midi_rx, frame_tx))?;

    let driver = Arc::new(WirelessDriver::bind(&cfg.group, cfg.port, mac).await?);
    let rx_driver = driver.clone();
    let rx_inbox = inbox_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = rx_driver.run_rx(rx_inbox).await {
            log::error!("wireless receive loop ended: {e}");
        }
    });

    // Wireless task: 10 ms cadence, sole writer of all protocol state.
    tokio::spawn(run_wireless_task(core, driver, inbox_rx, frame_rx, midi_tx, state_dir));

    shutdown_signal().await?;
    log::info!("shutting down");
    Ok(())
}

fn run_midi_task(
    mut link: HostLink,
    mut rx: mpsc::Receiver<MidiMsg>,
    frame_tx: mpsc::Sender<Vec<u8>>,
) {
    let mut assembler = SysexAssembler::new();
    while let Some(msg) = rx.blocking_recv() {
        match msg {
            MidiMsg::UsbIn(packet) => {
                if let Some(frame) = assembler.push(&packet) {
                    if frame_tx.blocking_send(frame).is_err() {
                        return;
                    }
                }
            }
            MidiMsg::HostSysex(frame) => {
                for packet in usb::packetize_sysex(&frame) {
                    link.write_packet(&packet);
                }
            }
            MidiMsg::HostPacket(packet) => link.write_packet(&packet),
        }
    }
}

async fn run_wireless_task(
    mut core: LayerLinkCore,
    driver: Arc<WirelessDriver>,
    mut inbox: mpsc::Receiver<(layerlink_core::Mac, Vec<u8>)>,
    mut frames: mpsc::Receiver<Vec<u8>>,
    midi_tx: mpsc::Sender<MidiMsg>,
    state_dir: PathBuf,
) {
    let boot = Instant::now();
    let mut clock = WallMeshClock;
    let now = |clock: &WallMeshClock| Now {
        local_ms: boot.elapsed().as_millis() as u64,
        mesh_ms: clock.mesh_millis(),
        mesh_synced: clock.synced(),
    };

    // Announce boot before any host traffic arrives.
    let hello = vec![core.hello(&now(&clock))];
    dispatch(hello, &driver, &midi_tx, &state_dir).await;

    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some((src, data)) = inbox.recv() => {
                let actions = core.on_wireless(src, &data, &now(&clock));
                dispatch(actions, &driver, &midi_tx, &state_dir).await;
            }
            Some(frame) = frames.recv() => {
                let actions = core.on_host_frame(&frame, &now(&clock));
                dispatch(actions, &driver, &midi_tx, &state_dir).await;
            }
            _ = interval.tick() => {
                clock.service_tick();
                let actions = core.tick(&now(&clock));
                dispatch(actions, &driver, &midi_tx, &state_dir).await;
            }
        }
    }
}

async fn dispatch(
    actions: Vec<Action>,
    driver: &WirelessDriver,
    midi_tx: &mpsc::Sender<MidiMsg>,
    state_dir: &std::path::Path,
) {
    for action in actions {
        match action {
            Action::Log { level, message } => match level {
                LogLevel::Debug => log::debug!("{message}"),
                LogLevel::Info => log::info!("{message}"),
                LogLevel::Warn => log::warn!("{message}"),
            },
            Action::SendDatagram { dest, payload } => {
                if let Err(e) = driver.send_to(dest, &payload).await {
                    // Fan-out failures are logged only; the protocol rides
                    // over loss.
                    log::debug!("unicast to {dest} failed: {e}");
                }
            }
            Action::Broadcast { payload } => {
                if let Err(e) = driver.broadcast(&payload).await {
                    log::debug!("broadcast failed: {e}");
                }
            }
            Action::ForwardSysex { dest, frame } => {
                if let Err(e) = driver.send_to(dest, &frame).await {
                    log::warn!("forward to {dest} refused: {e}");
                    let report =
                        sysex::error_report(ErrorCode::WirelessSendFailed, dest.as_bytes());
                    post_to_midi(midi_tx, MidiMsg::HostSysex(report));
                }
            }
            Action::HostSysex(frame) => post_to_midi(midi_tx, MidiMsg::HostSysex(frame)),
            Action::Midi(packet) => post_to_midi(midi_tx, MidiMsg::HostPacket(packet)),
            Action::AddPeer(mac) => driver.add_peer(mac).await,
            Action::RemovePeer(mac) => driver.remove_peer(mac).await,
            Action::PersistLayer(layer) => {
                if let Err(e) = storage::save_layer(state_dir, layer) {
                    log::error!("failed to persist layer: {e}");
                }
            }
        }
    }
}

/// Never blocks the wireless task on the MIDI queue; an overfull queue drops,
/// which the protocol tolerates everywhere else too.
fn post_to_midi(midi_tx: &mpsc::Sender<MidiMsg>, msg: MidiMsg) {
    if let Err(mpsc::error::TrySendError::Full(_)) = midi_tx.try_send(msg) {
        log::debug!("midi queue full, dropping host-bound message");
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).map_err(std::io::Error::other)?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
