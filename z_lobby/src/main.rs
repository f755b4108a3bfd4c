mod console_frontend;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use console::{style, Key, Term};
use console_frontend::ConsoleFrontend;
use lobby_session::{
    CoordinatorConfig, LobbyCommand, LobbyCoordinator, LocalLobbyService, LocalNetwork,
    MatchmakingClient, MemberId, SessionTransport, StepResult, ZenohTransport,
};
use zenoh::key_expr::KeyExpr;

/// z_lobby - lobby and session coordination demo
///
/// Simulates several members in one process, sharing an in-process lobby
/// service. The game session runs over an in-process network, or over zenoh
/// with `--zenoh`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of simulated members
    #[arg(short, long, default_value_t = 3)]
    members: usize,

    /// Coordinator settings (JSON file)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Run game sessions over zenoh
    #[arg(short, long)]
    zenoh: bool,

    /// Key expression prefix for the zenoh transport
    #[arg(short, long)]
    prefix: Option<KeyExpr<'static>>,

    /// Path to Zenoh config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Session backend shared by all simulated members
enum Backend {
    Local(LocalNetwork),
    Zenoh {
        session: zenoh::Session,
        prefix: KeyExpr<'static>,
    },
}

impl Backend {
    fn transport(&self, member: &MemberId) -> Arc<dyn SessionTransport> {
        match self {
            Backend::Local(network) => Arc::new(network.transport(member.as_str())),
            Backend::Zenoh { session, prefix } => Arc::new(ZenohTransport::new(
                session.clone(),
                prefix.clone(),
                member.clone(),
            )),
        }
    }
}

struct SimulatedMember {
    id: MemberId,
    frontend: Arc<ConsoleFrontend>,
    sender: flume::Sender<LobbyCommand>,
}

const COLORS: [u8; 6] = [39, 208, 112, 170, 220, 203];

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    if args.members == 0 || args.members > 9 {
        return Err(anyhow!("--members must be within 1..=9"));
    }

    let settings = match &args.settings {
        Some(path) => CoordinatorConfig::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => CoordinatorConfig::default(),
    };

    let backend = if args.zenoh {
        let zenoh_config = if let Some(config_path) = &args.config {
            zenoh::Config::from_file(config_path)
                .map_err(|e| anyhow!("Failed to load config file: {}", e))?
        } else {
            zenoh::Config::default()
        };
        let session = zenoh::open(zenoh_config)
            .await
            .map_err(|e| anyhow!("Failed to open zenoh session: {}", e))?;
        let prefix = match args.prefix.clone() {
            Some(prefix) => prefix,
            None => KeyExpr::try_from("z_lobby".to_string())
                .map_err(|e| anyhow!("Invalid prefix key expression: {}", e))?,
        };
        Backend::Zenoh { session, prefix }
    } else {
        Backend::Local(LocalNetwork::new())
    };

    let service = LocalLobbyService::new();
    let mut members = Vec::new();
    let mut tasks = Vec::new();
    for index in 0..args.members {
        let matchmaking = service.connect(None);
        let id = matchmaking.local_member();
        let frontend = Arc::new(ConsoleFrontend::new(
            matchmaking.member_name(&id),
            COLORS[index % COLORS.len()],
        ));
        let mut coordinator = LobbyCoordinator::builder(
            Arc::new(matchmaking),
            backend.transport(&id),
            frontend.clone(),
        )
        .config(settings.clone())
        .build()?;
        coordinator.open_menu();

        members.push(SimulatedMember {
            id,
            frontend: frontend.clone(),
            sender: coordinator.sender(),
        });
        tasks.push(tokio::spawn(async move {
            loop {
                match coordinator.step().await {
                    StepResult::StateChanged { from, to } => {
                        println!(
                            "{} {} -> {}",
                            style(format!("[{}]", frontend.name())).bold(),
                            from,
                            style(to).green()
                        );
                    }
                    StepResult::RosterUpdated | StepResult::Timeout => {}
                    StepResult::Stop => break,
                }
            }
            tracing::info!("Member '{}' stopped", frontend.name());
        }));
    }

    println!("=== z_lobby - Lobby Session Demo ===");
    println!(
        "Session transport: {}",
        if args.zenoh { "zenoh" } else { "in-process" }
    );
    for (index, member) in members.iter().enumerate() {
        println!("  {} - {} ({})", index + 1, member.frontend.name(), member.id);
    }
    println!("Commands (for the selected member):");
    println!("  1-9 - Select member");
    println!("  c - Create lobby");
    println!("  i - Open invite dialog");
    println!("  a - Accept the latest invite");
    println!("  s - Start game");
    println!("  m - Exit to menu");
    println!("  k - Close lobby");
    println!("  x - Exit game");
    println!("  r - Show roster");
    println!("  q - Quit");
    println!();

    // Keyboard input runs on a detached thread: `read_key` blocks until the
    // next key press and cannot be cancelled
    let keyboard_service = service.clone();
    std::thread::spawn(move || {
        let input_term = Term::stdout();
        let mut selected = 0usize;
        loop {
            let Ok(key) = input_term.read_key() else {
                break;
            };
            let member = &members[selected];
            let command = match key {
                Key::Char(digit @ '1'..='9') => {
                    let index = digit as usize - '1' as usize;
                    if index < members.len() {
                        selected = index;
                        println!("→ Selected {}", members[index].frontend.name());
                    }
                    None
                }
                Key::Char('c') => Some(LobbyCommand::CreateLobby(None)),
                Key::Char('i') => Some(LobbyCommand::InviteFriend),
                Key::Char('a') => {
                    match keyboard_service.invite_dialogs().last() {
                        Some((from, lobby)) => {
                            println!("→ {} accepts the invite of {}", member.frontend.name(), from);
                            if let Err(e) = keyboard_service.invite(&member.id, lobby) {
                                println!("→ Invite failed: {}", e);
                            }
                        }
                        None => println!("→ No invite dialog was opened yet"),
                    }
                    None
                }
                Key::Char('s') => Some(LobbyCommand::StartGame),
                Key::Char('m') => Some(LobbyCommand::ExitToMenu),
                Key::Char('k') => Some(LobbyCommand::HostCloseLobby),
                Key::Char('x') => Some(LobbyCommand::ExitGame),
                Key::Char('r') => {
                    member.frontend.print_roster();
                    None
                }
                Key::Char('q') | Key::Char('Q') => {
                    println!("→ Quit requested");
                    for member in &members {
                        let _ = member.sender.send(LobbyCommand::Stop);
                    }
                    break;
                }
                _ => None,
            };
            if let Some(command) = command {
                // The member's run loop ends after ExitGame
                if member.sender.send(command).is_err() {
                    println!("→ {} has left", member.frontend.name());
                }
            }
            if members.iter().all(|member| member.sender.is_disconnected()) {
                break;
            }
        }
    });

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("Member task failed: {}", e);
        }
    }

    println!("Goodbye!");
    Ok(())
}
