mod config;

use anyhow::{Context, Result};
use clap::Parser;
use delivery_bot_core::{
    Position,
    generator::generate_world,
    pathfinding::Algorithm,
    policy::{DecisionMode, PolicyKind},
    simulation::{EpisodeOutcome, SimEvent, Simulation},
    world::{World, load_world_from_string},
};
use rand::{SeedableRng, rngs::StdRng};
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};
use std::{
    collections::{HashSet, VecDeque},
    fs::{self, File},
    io::{self, Stdout},
    path::PathBuf,
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

/// Number of events kept for the log panel.
const EVENT_LOG_LEN: usize = 100;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Map file to load; a world is generated when omitted
    #[arg(short, long, value_name = "MAP_FILE")]
    map: Option<PathBuf>,

    /// Seed for world generation
    #[arg(short, long)]
    seed: Option<u64>,

    /// Scales the battery reserve, pickup range and detour tolerance of the cost-aware policy
    #[arg(short, long)]
    weight: Option<f64>,

    /// Pathfinding algorithm: astar, dijkstra or greedy
    #[arg(short, long)]
    algorithm: Option<Algorithm>,

    /// Target selection policy: cost-aware or nearest
    #[arg(short, long)]
    policy: Option<PolicyKind>,

    /// Milliseconds between simulation ticks
    #[arg(short, long, default_value_t = 100)]
    delay: u64,

    /// TOML file with [simulation], [policy] and [generator] tables
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Run the episode to the end without a terminal UI and print a summary
    #[arg(long)]
    headless: bool,

    /// Write logs to this file
    #[arg(long, value_name = "LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Stop the episode after this many ticks
    #[arg(long)]
    max_ticks: Option<usize>,
}

struct App {
    /// The episode being displayed.
    simulation: Simulation,
    /// Seed of the generated world, if it was generated.
    seed: Option<u64>,
    /// Most recent events, newest last.
    events: VecDeque<String>,
    /// Shown while the robot is heading for an emergency recharge.
    alert: Option<String>,
    paused: bool,
    should_quit: bool,
}

impl App {
    fn new(simulation: Simulation, seed: Option<u64>) -> Self {
        App {
            simulation,
            seed,
            events: VecDeque::with_capacity(EVENT_LOG_LEN),
            alert: None,
            paused: false,
            should_quit: false,
        }
    }

    /// Handles one step of the simulation.
    fn tick(&mut self) {
        if self.paused || self.simulation.is_terminated() {
            return;
        }
        for event in self.simulation.tick() {
            self.record(&event);
        }
    }

    fn record(&mut self, event: &SimEvent) {
        match event {
            SimEvent::TargetChosen { decision } => {
                self.alert = (decision.mode == DecisionMode::Emergency).then(|| {
                    format!(
                        "Battery {} is too low, heading to recharger at {}",
                        self.simulation.agent().battery,
                        decision.target
                    )
                });
            }
            SimEvent::Recharge { .. } => self.alert = None,
            // Steps would drown out everything else
            SimEvent::Moved { .. } => return,
            _ => {}
        }
        if self.events.len() == EVENT_LOG_LEN {
            self.events.pop_front();
        }
        self.events.push_back(event.to_string());
    }

    fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Sets the quit flag.
    fn quit(&mut self) {
        self.should_quit = true;
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    init_tracing(&args)?;

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    apply_overrides(&mut config, &args);

    let (world, seed) = build_world(&args, &config)?;
    let policy = args.policy.unwrap_or_default().build(&config.policy);
    let mut simulation = Simulation::new(world, policy, config.simulation.clone())
        .context("Failed to start the episode")?;
    info!(seed = ?seed, policy = simulation.policy_name(), "world ready");

    if args.headless {
        let outcome = simulation.run();
        print_summary(&outcome, seed);
        return Ok(());
    }

    // Set up the terminal
    let mut terminal = setup_terminal()?;

    let mut app = App::new(simulation, seed);
    let result = run_app(&mut terminal, &mut app, Duration::from_millis(args.delay));

    // Restore the terminal even when the loop failed
    restore_terminal(&mut terminal)?;
    result?;

    if let Some(outcome) = app.simulation.outcome() {
        print_summary(&outcome, app.seed);
    }
    Ok(())
}

/// Installs the log subscriber: stderr when headless, a file when asked for,
/// and nothing otherwise so the alternate screen stays clean.
fn init_tracing(args: &Args) -> Result<()> {
    if let Some(path) = &args.log_file {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        let installed = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init();
        if let Err(err) = installed {
            // Another subscriber owns the output; the file stays empty
            warn!(%err, log_file = %path.display(), "log file not in use");
        }
    } else if args.headless {
        // Already installed means logs already go somewhere
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(io::stderr)
            .try_init();
    }
    Ok(())
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    config.align_rewards();
    if let Some(algorithm) = args.algorithm {
        config.simulation.algorithm = algorithm;
    }
    if let Some(weight) = args.weight {
        config.policy.apply_weight(weight);
    }
    if args.max_ticks.is_some() {
        config.simulation.max_ticks = args.max_ticks;
    }
}

/// Loads the map file if one was given, otherwise generates a world.
fn build_world(args: &Args, config: &AppConfig) -> Result<(World, Option<u64>)> {
    if let Some(map_file) = &args.map {
        // Ensure the map file exists
        if !map_file.exists() {
            return Err(anyhow::anyhow!(
                "Map file does not exist: {}",
                map_file.display()
            ));
        }
        let file_string = fs::read_to_string(map_file)
            .with_context(|| format!("Failed to read map file {}", map_file.display()))?;
        let world = load_world_from_string(&file_string)
            .with_context(|| format!("Failed to load map {}", map_file.display()))?;
        return Ok((world, None));
    }

    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let world = generate_world(&config.generator, &mut rng)
        .with_context(|| format!("Failed to generate a world from seed {seed}"))?;
    Ok((world, Some(seed)))
}

fn print_summary(outcome: &EpisodeOutcome, seed: Option<u64>) {
    if let Some(seed) = seed {
        println!("Seed:       {seed}");
    }
    println!("Result:     {}", outcome.termination);
    println!("Score:      {}", outcome.score);
    println!("Steps:      {}", outcome.steps);
    println!("Deliveries: {}", outcome.deliveries);
    println!("Battery:    {}", outcome.battery);
}

/// Configures the terminal for TUI interaction.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the main loop of the TUI application.
fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    tick_rate: Duration,
) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => app.quit(),
                    KeyCode::Char(' ') => app.toggle_pause(),
                    _ => {}
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick();
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Renders the user interface.
fn ui(frame: &mut Frame, app: &App) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),    // Map and side panel
            Constraint::Length(3), // Alert
            Constraint::Length(2), // Help
        ])
        .split(frame.area());

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(main_layout[0]);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(9), // Stats
            Constraint::Length(3), // Battery
            Constraint::Min(0),    // Event log
        ])
        .split(body[1]);

    render_map(frame, body[0], app);
    render_stats(frame, side[0], app);
    render_battery(frame, side[1], &app.simulation);
    render_events(frame, side[2], &app.events);
    render_alert(frame, main_layout[1], app);

    let help = if app.simulation.is_terminated() {
        "Episode over. Press 'q' or 'Esc' to quit."
    } else {
        "Press 'space' to pause, 'q' or 'Esc' to quit."
    };
    let help_text = Paragraph::new(help)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

/// Renders the warehouse floor, entities and the planned route.
fn render_map(frame: &mut Frame, area: Rect, app: &App) {
    let sim = &app.simulation;
    let map = sim.map();
    let agent = sim.agent().position;
    let route: HashSet<Position> = sim.remaining_path().iter().copied().collect();

    let mut lines: Vec<Line> = Vec::with_capacity(map.height());
    for y in 0..map.height() {
        let mut spans: Vec<Span> = Vec::with_capacity(map.width());
        for x in 0..map.width() {
            let pos = Position::new(x, y);
            let span = if pos == agent {
                Span::styled("@", Style::default().fg(Color::Red).bold())
            } else if sim.recharger() == Some(pos) {
                Span::styled("R", Style::default().fg(Color::Cyan).bold())
            } else if sim.packages().contains(&pos) {
                Span::styled("p", Style::default().fg(Color::Yellow))
            } else if sim.goals().contains(&pos) {
                Span::styled("g", Style::default().fg(Color::Green))
            } else if map.is_obstacle(pos) {
                Span::styled("#", Style::default().fg(Color::DarkGray))
            } else if route.contains(&pos) {
                Span::styled(".", Style::default().fg(Color::Blue))
            } else {
                Span::raw(" ")
            };
            spans.push(span);
        }
        lines.push(Line::from(spans));
    }

    let title = match app.seed {
        Some(seed) => format!("Delivery Bot (seed {seed})"),
        None => "Delivery Bot".to_string(),
    };
    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title(title).borders(Borders::ALL))
        .alignment(Alignment::Center);

    frame.render_widget(map_paragraph, area);
}

fn render_stats(frame: &mut Frame, area: Rect, app: &App) {
    let sim = &app.simulation;
    let agent = sim.agent();

    let target = match sim.current_target() {
        Some(decision) => format!("{} ({:?})", decision.target, decision.mode),
        None => "-".to_string(),
    };
    let status = match sim.termination() {
        Some(reason) => reason.to_string(),
        None if app.paused => "paused".to_string(),
        None => "running".to_string(),
    };

    let mut rows = vec![
        Line::from(format!("Policy:     {} / {}", sim.policy_name(), sim.config().algorithm)),
        Line::from(format!("Status:     {status}")),
        Line::from(format!("Target:     {target}")),
        Line::from(format!("Position:   {}", agent.position)),
        Line::from(format!("Cargo:      {}/{}", agent.cargo, agent.cargo_capacity)),
        Line::from(format!("Score:      {}", sim.score())),
        Line::from(format!("Steps:      {}", sim.steps())),
        Line::from(format!("Delivered:  {} ({} left)", sim.deliveries(), sim.goals().len())),
    ];
    rows.truncate(area.height.saturating_sub(2) as usize);

    let stats = Paragraph::new(rows).block(Block::default().title("Robot").borders(Borders::ALL));
    frame.render_widget(stats, area);
}

fn render_battery(frame: &mut Frame, area: Rect, sim: &Simulation) {
    let agent = sim.agent();
    let ratio = if agent.max_battery > 0 {
        (agent.battery as f64 / agent.max_battery as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let color = match ratio {
        r if r <= 0.0 => Color::Red,
        r if r < 0.3 => Color::Yellow,
        _ => Color::Green,
    };

    let gauge = Gauge::default()
        .block(Block::default().title("Battery").borders(Borders::ALL))
        .gauge_style(Style::default().fg(color))
        .ratio(ratio)
        .label(format!("{}/{}", agent.battery, agent.max_battery));
    frame.render_widget(gauge, area);
}

fn render_events(frame: &mut Frame, area: Rect, events: &VecDeque<String>) {
    let items: Vec<ListItem> = events
        .iter()
        .rev()
        .map(|line| ListItem::new(line.as_str()))
        .collect();

    let list = List::new(items).block(Block::default().title("Events").borders(Borders::ALL));
    frame.render_widget(list, area);
}

fn render_alert(frame: &mut Frame, area: Rect, app: &App) {
    let (text, style) = match &app.alert {
        Some(alert) => (
            alert.as_str(),
            Style::default().fg(Color::White).bg(Color::Red).bold(),
        ),
        None => ("", Style::default()),
    };
    let alert = Paragraph::new(text)
        .style(style)
        .alignment(Alignment::Center)
        .block(Block::default().title("Alert").borders(Borders::ALL));
    frame.render_widget(alert, area);
}
