use clap::Parser;
use crossterm::{
    event::EventStream,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use hitter_dash::logging::init_logging;
use hitter_dash::tui::{DashboardView, KeyAction};
use hitter_dash::{
    load_config, run_transport, Args, CommandSender, Engine, EngineEvent, HeadlessRenderer,
    Intent,
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::error::Error;
use std::io::{self, Stdout};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const RECONCILE_INTERVAL: Duration = Duration::from_secs(1);
const EVENT_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = match load_config(Args::parse()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config_error: {err}");
            std::process::exit(2);
        }
    };
    let _log_guard = init_logging(&config.log_dir, config.log_stdout || config.headless);
    info!(
        event = "startup",
        ws = %config.endpoints.ws,
        state = %config.endpoints.state,
        headless = config.headless
    );

    let (commands, command_rx) = CommandSender::channel();
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let transport = config.transport();
    tokio::spawn(async move {
        if let Err(err) = run_transport(transport, event_tx, command_rx).await {
            error!(event = "transport_stopped", error = %err);
        }
    });

    if config.headless {
        run_headless(Engine::new(HeadlessRenderer::new(), commands), event_rx).await;
        return Ok(());
    }
    let engine = Engine::new(DashboardView::new(config.databases.clone()), commands);
    run_dashboard(engine, event_rx).await
}

async fn run_headless(
    mut engine: Engine<HeadlessRenderer>,
    mut event_rx: mpsc::Receiver<EngineEvent>,
) {
    let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => engine.handle(EngineEvent::Tick),
            maybe_event = event_rx.recv() => match maybe_event {
                Some(event) => engine.handle(event),
                None => break,
            },
            _ = &mut shutdown => {
                info!(event = "shutdown", reason = "ctrl_c");
                break;
            }
        }
    }
}

async fn run_dashboard(
    engine: Engine<DashboardView>,
    event_rx: mpsc::Receiver<EngineEvent>,
) -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = dashboard_loop(&mut terminal, engine, event_rx).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

async fn dashboard_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    mut engine: Engine<DashboardView>,
    mut event_rx: mpsc::Receiver<EngineEvent>,
) -> Result<(), Box<dyn Error>> {
    let mut keys = EventStream::new();
    let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);

    loop {
        terminal.draw(|frame| engine.renderer().draw(frame))?;
        tokio::select! {
            _ = ticker.tick() => engine.handle(EngineEvent::Tick),
            Some(event) = event_rx.recv() => engine.handle(event),
            input = keys.next() => {
                let settings = engine.settings();
                match engine.renderer_mut().handle_input(input, settings) {
                    KeyAction::Quit => break,
                    KeyAction::Submit(intent) => submit(&mut engine, intent),
                    KeyAction::LogsShown(slot) => engine.mark_logs_read(slot),
                    KeyAction::None => {}
                }
            }
        }
    }
    Ok(())
}

fn submit(engine: &mut Engine<DashboardView>, intent: Intent) {
    let note = match engine.submit(intent) {
        Ok(1) => "command sent".to_string(),
        Ok(count) => format!("{count} commands sent"),
        Err(err) => {
            warn!(event = "command_rejected", error = %err);
            err.to_string()
        }
    };
    engine.renderer_mut().set_status(note);
}
