use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use clap::{Args, Parser, Subcommand};
use supplier_portal_lib::commands::{self, admin::FeedbackTimeline};
use supplier_portal_lib::mock::{MockServer, DEFAULT_CHUNK_DELAY};
use supplier_portal_lib::models::{AdminChatQuery, ChatMessage, Granularity, MessageStatus, MessageType, ReactionType};
use supplier_portal_lib::services::admin_stats::{bar, sub_cluster_shares};
use supplier_portal_lib::services::auth_service::RegisterForm;
use supplier_portal_lib::services::chat_state::reply_after;
use supplier_portal_lib::services::config_service;
use supplier_portal_lib::services::content_service::{referenced_documents, render_html, to_plain_text};
use supplier_portal_lib::services::file_service::get_app_data_dir;
use supplier_portal_lib::{init_tracing, AppState};

const BAR_WIDTH: usize = 30;

#[derive(Debug, Parser)]
#[command(name = "supplier-portal", version, about = "Supplier portal assistant client")]
struct Cli {
    /// Override the API base URL for this run.
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and remember the session.
    Login {
        #[arg(short, long)]
        username: String,
        /// Read from stdin when omitted.
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Create an account and sign in.
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        #[arg(long)]
        confirm: String,
    },
    /// Forget the saved session.
    Logout,
    /// Show the signed-in user.
    Whoami,
    #[command(subcommand)]
    Config(ConfigCommand),
    #[command(subcommand)]
    Chats(ChatsCommand),
    /// Send a message and stream the assistant's reply.
    Send {
        chat_id: String,
        text: String,
        /// Attach a file (repeatable).
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        /// Seconds to wait for the reply.
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },
    /// Rate an assistant reply.
    React {
        message_id: String,
        #[arg(value_parser = parse_reaction)]
        reaction: ReactionType,
    },
    #[command(subcommand)]
    Files(FilesCommand),
    #[command(subcommand)]
    Admin(AdminCommand),
    /// Run the in-memory mock backend.
    MockServer {
        #[arg(long, default_value_t = 8000)]
        port: u16,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = DEFAULT_CHUNK_DELAY.as_millis() as u64)]
        chunk_delay_ms: u64,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
    SetApiUrl { url: String },
    SetWsUrl { url: String },
    SetDownloadDir { dir: PathBuf },
}

#[derive(Debug, Subcommand)]
enum ChatsCommand {
    List,
    Create {
        #[arg(long)]
        title: Option<String>,
    },
    Show {
        chat_id: String,
        /// Print message bodies as HTML.
        #[arg(long)]
        html: bool,
    },
    Rename { chat_id: String, title: String },
    Delete { chat_id: String },
}

#[derive(Debug, Subcommand)]
enum FilesCommand {
    Upload { path: PathBuf },
    Download { file_id: String },
    Info { file_id: String },
    Open { file_id: String },
    Delete { file_id: String },
}

#[derive(Debug, Subcommand)]
enum AdminCommand {
    /// Requests per cluster.
    Clusters {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long)]
        top: Option<usize>,
        /// Also break each cluster down by sub-cluster.
        #[arg(long)]
        detail: bool,
    },
    /// Likes and dislikes over time.
    Feedback {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long, default_value = "day")]
        granularity: Granularity,
    },
    /// Browse all chats.
    Chats {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
        #[arg(long)]
        cluster: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Show any chat's transcript.
    Chat { chat_id: String },
}

#[derive(Debug, Args)]
struct RangeArgs {
    #[arg(long, default_value_t = 30)]
    days: i64,
}

fn parse_reaction(value: &str) -> Result<ReactionType, String> {
    match value.to_ascii_lowercase().as_str() {
        "like" | "up" | "+1" => Ok(ReactionType::Like),
        "dislike" | "down" | "-1" => Ok(ReactionType::Dislike),
        other => Err(format!("Unknown reaction: {}", other)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let command = match cli.command {
        Command::MockServer {
            port,
            host,
            chunk_delay_ms,
        } => return run_mock_server(&host, port, chunk_delay_ms).await,
        Command::Config(cmd) => return run_config(cmd),
        command => command,
    };

    let mut config = commands::config::get_config()?;
    if let Some(url) = cli.api_url {
        config.api_base_url = config_service::validate_base_url(&url, &["http", "https"])
            .map_err(|e| e.to_string())?;
    }
    let data_dir = get_app_data_dir().map_err(|e| e.to_string())?;
    let state = AppState::new(config, &data_dir).map_err(|e| e.to_string())?;

    match command {
        Command::Login { username, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt("Password: ")?,
            };
            let status = commands::auth::login(&state, username, password).await?;
            println!("Signed in as {}", status.username.unwrap_or_default());
        }
        Command::Register {
            username,
            email,
            password,
            confirm,
        } => {
            let form = RegisterForm {
                username,
                email,
                password,
                confirm_password: confirm,
            };
            let status = commands::auth::register(&state, form).await?;
            println!("Registered and signed in as {}", status.username.unwrap_or_default());
        }
        Command::Logout => {
            commands::auth::signout(&state).await?;
            println!("Signed out");
        }
        command => {
            let status = commands::auth::restore_session(&state).await?;
            if !status.is_authenticated {
                return Err("Not signed in. Run `supplier-portal login` first.".to_string());
            }
            run_signed_in(&state, command).await?;
        }
    }
    Ok(())
}

async fn run_signed_in(state: &AppState, command: Command) -> Result<(), String> {
    match command {
        Command::Whoami => {
            let user = commands::auth::get_current_user(state).await?;
            let role = if user.is_admin() { "admin" } else { "user" };
            println!("{} ({})", user.username, role);
            if let Some(email) = user.email {
                println!("{}", email);
            }
        }
        Command::Chats(cmd) => run_chats(state, cmd).await?,
        Command::Send {
            chat_id,
            text,
            files,
            timeout,
        } => {
            commands::chat::open_chat(state, chat_id).await?;
            let sent = commands::chat::send_chat_message(state, text, files).await?;
            stream_reply(state, &sent.user_message.id, Duration::from_secs(timeout)).await?;
            commands::chat::close_chat(state).await;
        }
        Command::React { message_id, reaction } => {
            let reaction = commands::chat::react_to_message(state, message_id, reaction).await?;
            println!("Recorded {:?} on {}", reaction.reaction_type, reaction.message_id);
        }
        Command::Files(cmd) => run_files(state, cmd).await?,
        Command::Admin(cmd) => run_admin(state, cmd).await?,
        _ => {}
    }
    Ok(())
}

fn run_config(cmd: ConfigCommand) -> Result<(), String> {
    let config = match cmd {
        ConfigCommand::Show => commands::config::get_config()?,
        ConfigCommand::SetApiUrl { url } => commands::config::set_api_url(url)?,
        ConfigCommand::SetWsUrl { url } => commands::config::set_ws_url(url)?,
        ConfigCommand::SetDownloadDir { dir } => commands::config::set_download_dir(dir)?,
    };
    let json = serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

async fn run_chats(state: &AppState, cmd: ChatsCommand) -> Result<(), String> {
    match cmd {
        ChatsCommand::List => {
            let chats = commands::chat::list_chats(state).await?;
            if chats.is_empty() {
                println!("No chats yet.");
            }
            for chat in chats {
                println!(
                    "{}  {}  ({} messages, {})",
                    chat.id,
                    chat.title,
                    chat.message_count,
                    chat.updated_at.format("%Y-%m-%d %H:%M")
                );
                if let Some(preview) = chat.last_message_preview {
                    println!("    {}", preview);
                }
            }
        }
        ChatsCommand::Create { title } => {
            let chat = commands::chat::create_chat(state, title).await?;
            println!("{}  {}", chat.id, chat.title);
        }
        ChatsCommand::Show { chat_id, html } => {
            let chat = commands::chat::get_chat(state, chat_id).await?;
            println!("# {}", chat.title);
            print_transcript(&chat.messages, html);
        }
        ChatsCommand::Rename { chat_id, title } => {
            let chat = commands::chat::rename_chat(state, chat_id, title).await?;
            println!("Renamed to {}", chat.title);
        }
        ChatsCommand::Delete { chat_id } => {
            commands::chat::delete_chat(state, chat_id).await?;
            println!("Deleted");
        }
    }
    Ok(())
}

async fn run_files(state: &AppState, cmd: FilesCommand) -> Result<(), String> {
    match cmd {
        FilesCommand::Upload { path } => {
            let file = commands::files::upload_file(state, path).await?;
            println!("{}  {} ({})", file.id, file.name, file.kind.label());
        }
        FilesCommand::Download { file_id } => {
            let path = commands::files::download_file(state, file_id).await?;
            println!("Saved to {}", path.display());
        }
        FilesCommand::Info { file_id } => {
            let file = commands::files::get_file_info(state, file_id).await?;
            let json = serde_json::to_string_pretty(&file).map_err(|e| e.to_string())?;
            println!("{}", json);
        }
        FilesCommand::Open { file_id } => {
            let target = commands::files::open_file_preview(state, file_id).await?;
            println!("Opened {}", target);
        }
        FilesCommand::Delete { file_id } => {
            commands::files::delete_file(state, file_id).await?;
            println!("Deleted");
        }
    }
    Ok(())
}

async fn run_admin(state: &AppState, cmd: AdminCommand) -> Result<(), String> {
    match cmd {
        AdminCommand::Clusters { range, top, detail } => {
            let overview = commands::admin::cluster_overview(state, range.days, top).await?;
            if overview.total_requests == 0 {
                println!("No requests in the last {} days.", range.days);
                return Ok(());
            }

            println!("{} requests in the last {} days", overview.total_requests, range.days);
            let max = overview.shares.iter().map(|s| s.count).max().unwrap_or(0);
            for share in &overview.shares {
                println!(
                    "{:<20} {} {:>6} ({:.1}%)",
                    share.name,
                    bar(share.count, max, BAR_WIDTH),
                    share.count,
                    share.percent
                );
            }

            if detail {
                for cluster in &overview.clusters {
                    println!("\n{}", cluster.cluster);
                    for share in sub_cluster_shares(cluster) {
                        println!("  {:<24} {:>6} ({:.1}%)", share.name, share.count, share.percent);
                    }
                }
            }
        }
        AdminCommand::Feedback { range, granularity } => {
            let timeline = commands::admin::feedback_timeline(state, granularity, range.days).await?;
            print_feedback(&timeline);
        }
        AdminCommand::Chats {
            page,
            page_size,
            cluster,
            search,
        } => {
            let query = AdminChatQuery {
                page,
                page_size,
                cluster,
                search,
            };
            let rows = commands::admin::list_admin_chats(state, query).await?;
            if rows.items.is_empty() {
                println!("No chats match.");
            }
            for row in &rows.items {
                println!(
                    "{}  {:<30} {:<12} {:<16} {:>4} msgs  +{} -{}",
                    row.id,
                    row.title,
                    row.user.as_deref().unwrap_or("-"),
                    row.cluster.as_deref().unwrap_or("-"),
                    row.message_count,
                    row.likes,
                    row.dislikes
                );
            }
            println!(
                "Page {} of {} ({} chats)",
                rows.page,
                rows.total_pages().max(1),
                rows.total
            );
        }
        AdminCommand::Chat { chat_id } => {
            let chat = commands::admin::get_admin_chat(state, chat_id).await?;
            println!("# {}", chat.title);
            print_transcript(&chat.messages, false);
        }
    }
    Ok(())
}

fn print_feedback(timeline: &FeedbackTimeline) {
    let totals = &timeline.totals;
    if totals.total == 0 {
        println!("No feedback in this period.");
        return;
    }

    let max = timeline.series.iter().map(|b| b.total()).max().unwrap_or(0);
    let format = match timeline.granularity {
        Granularity::Hour => "%Y-%m-%d %H:00",
        Granularity::Day | Granularity::Week => "%Y-%m-%d",
    };
    for bucket in &timeline.series {
        println!(
            "{:<16} {} +{} -{} ~{}",
            bucket.bucket_start.format(format),
            bar(bucket.total(), max, BAR_WIDTH),
            bucket.likes,
            bucket.dislikes,
            bucket.neutral
        );
    }

    println!(
        "\n{} likes, {} dislikes, {} neutral",
        totals.likes, totals.dislikes, totals.neutral
    );
    if let Some(rate) = totals.satisfaction_rate {
        println!("Satisfaction: {:.1}%", rate * 100.0);
    }
}

fn print_transcript(messages: &[ChatMessage], html: bool) {
    if messages.is_empty() {
        println!("(no messages)");
    }
    for message in messages {
        let who = match message.message_type {
            MessageType::User => "you",
            MessageType::Ai => "assistant",
            MessageType::System => "system",
        };
        let body = if html {
            render_html(&message.content)
        } else {
            to_plain_text(&message.content)
        };
        println!("\n[{}] {} ({:?})", who, message.id, message.status);
        println!("{}", body.trim_end());
        for file in &message.files {
            println!("  attached: {} ({})", file.name, file.id);
        }
        for reaction in &message.reactions {
            println!("  rated: {:?}", reaction.reaction_type);
        }
    }
}

/// Print the reply to `user_message_id` as it streams in.
async fn stream_reply(state: &AppState, user_message_id: &str, timeout: Duration) -> Result<(), String> {
    let mut updates = state.controller.store().subscribe();
    let waiter = commands::chat::wait_for_reply(state, user_message_id.to_string(), timeout);
    tokio::pin!(waiter);
    let mut printed = String::new();

    loop {
        tokio::select! {
            result = &mut waiter => {
                let reply = match result {
                    Ok(reply) => reply,
                    Err(e) => {
                        // The stream may have dropped the completion; ask the server.
                        commands::chat::reload_chat(state).await?;
                        commands::chat::dismiss_chat_error(state);
                        match reply_after(&state.controller.store().snapshot(), user_message_id) {
                            Some(reply) if reply.status == MessageStatus::Completed => reply,
                            _ => return Err(e),
                        }
                    }
                };
                match reply.content.strip_prefix(printed.as_str()) {
                    Some(rest) => print!("{}", rest),
                    None => print!("\n{}", reply.content),
                }
                println!();

                let documents = referenced_documents(&reply.content);
                if !documents.is_empty() {
                    println!("\nReferences:");
                    for doc in documents {
                        println!("  {}  {}", doc.display(), doc.link());
                    }
                }

                let suggestions = state.controller.store().snapshot().suggestions;
                if !suggestions.is_empty() {
                    println!("\nYou could also ask:");
                    for suggestion in suggestions {
                        println!("  - {}", suggestion);
                    }
                }
                println!("\n(reply id {})", reply.id);
                return Ok(());
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    continue;
                }
                let snapshot = updates.borrow_and_update().clone();
                if let Some(reply) = reply_after(&snapshot, user_message_id) {
                    if let Some(rest) = reply.content.strip_prefix(printed.as_str()) {
                        print!("{}", rest);
                        let _ = std::io::stdout().flush();
                        printed = reply.content;
                    }
                }
            }
        }
    }
}

fn prompt(label: &str) -> Result<String, String> {
    print!("{}", label);
    std::io::stdout().flush().map_err(|e| e.to_string())?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| e.to_string())?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn run_mock_server(host: &str, port: u16, chunk_delay_ms: u64) -> Result<(), String> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;
    let server = MockServer::start(addr, Duration::from_millis(chunk_delay_ms))
        .await
        .map_err(|e| e.to_string())?;

    println!("Mock backend at {}", server.api_base_url());
    println!("Sign in as \"{}\" for admin access. Press Ctrl+C to stop.", supplier_portal_lib::mock::ADMIN_USERNAME);
    tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
    Ok(())
}
