use anyhow::{Context, Result};
use clap::Parser;
use dungeon_nav_core::{
    Position,
    behavior::AgentState,
    config::SimConfig,
    generator::Cell,
    geometry::Vec2,
    level::{Level, Simulation, TickOutcome},
};
use rand::{SeedableRng, rngs::StdRng};
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};
use std::{
    collections::HashMap,
    io::{self, Stdout},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// World units the player moves per key press.
const PLAYER_STEP: f32 = 2.0;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON config file; defaults are used for anything it leaves out
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Seed for level generation and agents
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of agents to spawn
    #[arg(short, long, default_value_t = 3)]
    agents: usize,

    /// Log file (the terminal is taken by the UI)
    #[arg(long, value_name = "LOG_FILE", default_value = "dungeon_nav.log")]
    log_file: PathBuf,
}

struct App {
    config: SimConfig,
    agent_count: usize,
    rng: StdRng,
    /// The core simulation.
    simulation: Simulation,
    /// Flag to control the main loop.
    should_quit: bool,
    /// Set once the player reaches the exit.
    escaped: bool,
}

impl App {
    fn new(config: SimConfig, agent_count: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let simulation = build_simulation(&config, agent_count, &mut rng)?;
        Ok(App {
            config,
            agent_count,
            rng,
            simulation,
            should_quit: false,
            escaped: false,
        })
    }

    /// Replaces the level with a freshly generated one.
    fn regenerate(&mut self) -> Result<()> {
        self.simulation = build_simulation(&self.config, self.agent_count, &mut self.rng)?;
        self.escaped = false;
        Ok(())
    }

    /// Handles one step of the simulation.
    fn tick(&mut self) {
        if self.escaped {
            return;
        }
        if self.simulation.process_tick() == TickOutcome::Escaped {
            self.escaped = true;
        }
    }

    fn move_player(&mut self, dx: f32, dy: f32) {
        if !self.escaped {
            self.simulation.move_player(Vec2::new(dx, dy) * PLAYER_STEP);
        }
    }

    /// Sets the quit flag.
    fn quit(&mut self) {
        self.should_quit = true;
    }
}

fn build_simulation(config: &SimConfig, agent_count: usize, rng: &mut StdRng) -> Result<Simulation> {
    let level = Level::generate(&config.level, rng).context("Failed to generate level")?;
    let mut simulation = Simulation::new(level, config.tick_seconds);
    simulation
        .spawn_agents(agent_count, &config.agent, rng)
        .context("Failed to spawn agents")?;
    Ok(simulation)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_logging(&args.log_file)?;

    let config = match &args.config {
        Some(path) => SimConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SimConfig::default(),
    };
    let seed = args.seed.unwrap_or_else(rand::random);
    info!(seed, agents = args.agents, "starting");

    let mut app = App::new(config, args.agents, seed)?;

    // Set up the terminal
    let mut terminal = setup_terminal()?;

    // Run the main application loop
    let result = run_app(&mut terminal, &mut app);

    // Restore the terminal state
    restore_terminal(&mut terminal)?;

    result
}

/// Routes `tracing` output to a file through a non-blocking writer.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_logging(log_file: &Path) -> Result<WorkerGuard> {
    let directory = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = log_file
        .file_name()
        .context("Log file path has no file name")?;
    std::fs::create_dir_all(directory)?;

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    Ok(guard)
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
fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    let tick_rate = Duration::from_secs_f32(app.config.tick_seconds);
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => app.quit(),
                        KeyCode::Char('n') => app.regenerate()?,
                        KeyCode::Up | KeyCode::Char('w') => app.move_player(0.0, 1.0),
                        KeyCode::Down | KeyCode::Char('s') => app.move_player(0.0, -1.0),
                        KeyCode::Left | KeyCode::Char('a') => app.move_player(-1.0, 0.0),
                        KeyCode::Right | KeyCode::Char('d') => app.move_player(1.0, 0.0),
                        _ => {}
                    }
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
            Constraint::Percentage(70), // Area for the map
            Constraint::Percentage(20), // Area for agent status
            Constraint::Percentage(10), // Area for status/help
        ])
        .split(frame.area());

    render_map(frame, main_layout[0], &app.simulation);
    render_agents(frame, main_layout[1], &app.simulation);

    let status = if app.escaped {
        "Escaped! Press 'n' for a new level or 'q' to quit."
    } else {
        "Arrows/WASD move, 'n' new level, 'q' or 'Esc' quit."
    };
    let help_text = Paragraph::new(status)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

fn state_span(state: AgentState) -> Span<'static> {
    match state {
        AgentState::Wandering => Span::styled("W", Style::default().fg(Color::Cyan).bold()),
        AgentState::Idle => Span::styled("I", Style::default().fg(Color::Blue).bold()),
        AgentState::Attack => Span::styled("A", Style::default().fg(Color::Red).bold()),
        AgentState::WaitingToSearch => {
            Span::styled("?", Style::default().fg(Color::Yellow).bold())
        }
        AgentState::Searching => Span::styled("S", Style::default().fg(Color::Magenta).bold()),
    }
}

/// Renders one line per agent.
fn render_agents(frame: &mut Frame, area: Rect, simulation: &Simulation) {
    let items: Vec<ListItem> = simulation
        .agents()
        .into_iter()
        .map(|agent| {
            let body = agent.body();
            ListItem::from(Line::from(vec![
                state_span(agent.state()),
                Span::raw(format!(
                    " Agent {} {:?} at ({:.1}, {:.1})",
                    agent.id(),
                    agent.state(),
                    body.position.x,
                    body.position.y
                )),
            ]))
        })
        .collect();

    let title = format!("Agents (tick {})", simulation.ticks());
    let widget = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(widget, area);
}

/// Renders the dungeon grid with agents and the player. Row 0 of the grid is
/// drawn at the bottom so "up" on screen is +y in the world.
fn render_map(frame: &mut Frame, area: Rect, simulation: &Simulation) {
    let layout = simulation.level().layout();
    let grid = &layout.grid;

    let mut agent_cells: HashMap<Position, AgentState> = HashMap::new();
    for agent in simulation.agents() {
        if let Some(cell) = layout.world_to_cell(agent.body().position) {
            agent_cells.entry(cell).or_insert(agent.state());
        }
    }
    let player_cell = simulation
        .player()
        .and_then(|player| layout.world_to_cell(player));

    let mut lines: Vec<Line> = Vec::with_capacity(grid.height());
    for y in (0..grid.height()).rev() {
        let mut spans: Vec<Span> = Vec::with_capacity(grid.width());
        for x in 0..grid.width() {
            let position = Position { x, y };
            if player_cell == Some(position) {
                spans.push(Span::styled("@", Style::default().fg(Color::Green).bold()));
            } else if let Some(state) = agent_cells.get(&position) {
                spans.push(state_span(*state));
            } else {
                let cell = grid.get(x, y).copied().unwrap_or_default();
                let (tile_char, tile_style) = match cell {
                    Cell::Empty => (" ", Style::default()),
                    Cell::Wall => ("#", Style::default().fg(Color::DarkGray)),
                    Cell::OpenRoom => (".", Style::default()),
                    Cell::Entrance => ("E", Style::default().fg(Color::Green)),
                    Cell::Exit => ("X", Style::default().fg(Color::Yellow)),
                    Cell::VipRoom => ("V", Style::default().fg(Color::Magenta)),
                };
                spans.push(Span::styled(tile_char, tile_style));
            }
        }
        lines.push(Line::from(spans));
    }

    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title("Dungeon").borders(Borders::ALL))
        .alignment(Alignment::Center);

    frame.render_widget(map_paragraph, area);
}
