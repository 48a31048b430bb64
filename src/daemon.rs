//! WebSocket server
//!
//! One task per connection. A connection starts anonymous; file system
//! requests are answered with `unauthorized` until a login or signup
//! succeeds, after which every path is resolved inside that user's home.

use std::net::SocketAddr;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{protocol::WebSocketConfig, Message},
    WebSocketStream,
};

use crate::accounts::{AccountError, AccountService, JsonCredentialStore};
use crate::config::AppConfig;
use crate::filesystem::security::{sanitize_name, UserRoot};
use crate::filesystem::{breadcrumbs, mime, FileSystemService};
use crate::protocol::{BreadcrumbItem, ClientMessage, FileSystemError, ServerMessage};

/// Upper bound for a client-requested download chunk
const MAX_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type DaemonResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub struct DaemonState {
    pub file_system: Arc<FileSystemService>,
    pub accounts: Arc<AccountService>,
}

pub type SharedState = Arc<DaemonState>;

/// Per-connection login state
struct ClientSession {
    addr: SocketAddr,
    user: Option<UserRoot>,
}

impl ClientSession {
    fn user(&self) -> Result<&UserRoot, FileSystemError> {
        self.user.as_ref().ok_or(FileSystemError::Unauthorized)
    }
}

/// Start the server and block until Ctrl+C or SIGTERM.
pub async fn run(config: AppConfig) -> std::io::Result<()> {
    std::fs::create_dir_all(&config.filesystem.root)?;

    let file_system = Arc::new(FileSystemService::new(config.filesystem.clone()));
    let store = Arc::new(JsonCredentialStore::new(&config.user_db));
    let accounts = Arc::new(AccountService::new(store, file_system.shared_resolver()));
    let state = Arc::new(DaemonState {
        file_system,
        accounts,
    });

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(
        "Serving {} on ws://{}",
        config.filesystem.root.display(),
        addr
    );

    #[cfg(unix)]
    run_server_loop_unix(listener, state).await;
    #[cfg(not(unix))]
    run_server_loop_ctrlc_only(listener, state).await;

    Ok(())
}

fn spawn_connection(stream: TcpStream, addr: SocketAddr, state: SharedState) {
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, addr, state).await {
            tracing::debug!("Connection {} closed with error: {}", addr, e);
        }
    });
}

#[cfg(unix)]
async fn run_server_loop_unix(listener: TcpListener, state: SharedState) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(
                "Failed to set up SIGTERM handler: {}. Only Ctrl+C will work for shutdown.",
                e
            );
            run_server_loop_ctrlc_only(listener, state).await;
            return;
        }
    };

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => spawn_connection(stream, addr, state.clone()),
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Server shutting down (Ctrl+C)");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Server shutting down (SIGTERM)");
                break;
            }
        }
    }
}

async fn run_server_loop_ctrlc_only(listener: TcpListener, state: SharedState) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => spawn_connection(stream, addr, state.clone()),
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Server shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: SharedState) -> DaemonResult {
    // Uploads arrive base64-encoded in a single text frame.
    let max_upload = state.file_system.config().max_upload_size as usize;
    let max_message = (max_upload / 3 + 1) * 4 + 64 * 1024;
    let ws_config = WebSocketConfig {
        max_message_size: Some(max_message),
        max_frame_size: Some(max_message),
        ..Default::default()
    };
    let ws = accept_async_with_config(stream, Some(ws_config)).await?;
    let (mut tx, mut rx) = ws.split();
    tracing::info!("Client connected: {}", addr);

    let mut session = ClientSession { addr, user: None };

    while let Some(frame) = rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => process_client_msg(msg, &state, &mut tx, &mut session).await?,
                Err(e) => {
                    tracing::debug!("Unparseable message from {}: {}", addr, e);
                    let msg = ServerMessage::Error {
                        code: "invalid_message".to_string(),
                        message: e.to_string(),
                    };
                    send(&mut tx, &msg).await?;
                }
            },
            Ok(Message::Ping(data)) => tx.send(Message::Pong(data)).await?,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    match session.user {
        Some(root) => tracing::info!("Client disconnected: {} ({})", addr, root.username()),
        None => tracing::info!("Client disconnected: {}", addr),
    }
    Ok(())
}

async fn send(tx: &mut WsSink, msg: &ServerMessage) -> DaemonResult {
    tx.send(Message::Text(serde_json::to_string(msg)?)).await?;
    Ok(())
}

async fn send_fs_error(
    tx: &mut WsSink,
    request_id: String,
    operation: &str,
    path: &str,
    error: FileSystemError,
) -> DaemonResult {
    let msg = ServerMessage::OperationError {
        request_id,
        operation: operation.to_string(),
        path: path.to_string(),
        error,
    };
    send(tx, &msg).await
}

/// Send either the reply or the client-facing form of the error.
async fn reply(
    tx: &mut WsSink,
    state: &SharedState,
    request_id: String,
    operation: &str,
    path: &str,
    result: Result<ServerMessage, FileSystemError>,
) -> DaemonResult {
    match result {
        Ok(msg) => send(tx, &msg).await,
        Err(e) => {
            tracing::debug!("{} {:?} failed: {}", operation, path, e);
            let conceal = state.file_system.config().conceal_access_denied;
            send_fs_error(tx, request_id, operation, path, e.public(conceal)).await
        }
    }
}

fn auth_result(action: &str, success: bool, username: Option<String>, message: &str) -> ServerMessage {
    ServerMessage::AuthResult {
        action: action.to_string(),
        success,
        username,
        message: message.to_string(),
    }
}

fn operation_success(request_id: String, operation: &str, path: String) -> ServerMessage {
    ServerMessage::OperationSuccess {
        request_id,
        operation: operation.to_string(),
        path,
        message: None,
    }
}

/// Sanitized entry name, rejecting names that sanitize to nothing.
fn entry_name(raw: &str) -> Result<String, FileSystemError> {
    let name = sanitize_name(raw);
    if name.is_empty() {
        return Err(FileSystemError::InvalidName {
            name: raw.to_string(),
        });
    }
    Ok(name)
}

async fn process_client_msg(
    msg: ClientMessage,
    state: &SharedState,
    tx: &mut WsSink,
    session: &mut ClientSession,
) -> DaemonResult {
    let fs = state.file_system.clone();

    match msg {
        ClientMessage::Hello { client_version } => {
            tracing::debug!("Client {} says hello (v{})", session.addr, client_version);
            let msg = ServerMessage::Welcome {
                server_version: env!("CARGO_PKG_VERSION").to_string(),
                authenticated: session.user.is_some(),
            };
            send(tx, &msg).await?;
        }
        ClientMessage::Ping => {
            send(tx, &ServerMessage::Pong).await?;
        }
        ClientMessage::Login { username, password } => {
            let accounts = state.accounts.clone();
            let name = username.clone();
            let result =
                tokio::task::spawn_blocking(move || accounts.authenticate(&name, &password)).await?;
            let msg = match result {
                Ok(Some(root)) => {
                    let username = root.username().to_string();
                    session.user = Some(root);
                    auth_result("login", true, Some(username), "Logged in")
                }
                Ok(None) => auth_result("login", false, None, "Invalid username or password"),
                Err(e) => account_failure("login", &username, e),
            };
            send(tx, &msg).await?;
        }
        ClientMessage::Signup { username, password } => {
            let accounts = state.accounts.clone();
            let name = username.clone();
            let result =
                tokio::task::spawn_blocking(move || accounts.create_account(&name, &password))
                    .await?;
            let msg = match result {
                Ok(Some(root)) => {
                    let username = root.username().to_string();
                    session.user = Some(root);
                    auth_result("signup", true, Some(username), "Account created")
                }
                Ok(None) => auth_result("signup", false, None, "Username already exists"),
                Err(e) => account_failure("signup", &username, e),
            };
            send(tx, &msg).await?;
        }
        ClientMessage::ChangePassword {
            username,
            old_password,
            new_password,
        } => {
            let accounts = state.accounts.clone();
            let name = username.clone();
            let result = tokio::task::spawn_blocking(move || {
                accounts.change_password(&name, &old_password, &new_password)
            })
            .await?;
            let msg = match result {
                Ok(true) => auth_result("change_password", true, None, "Password changed"),
                Ok(false) => auth_result(
                    "change_password",
                    false,
                    None,
                    "Invalid username or password",
                ),
                Err(e) => account_failure("change_password", &username, e),
            };
            send(tx, &msg).await?;
        }
        ClientMessage::Logout => {
            if let Some(root) = session.user.take() {
                tracing::info!("User {} logged out", root.username());
            }
            send(tx, &auth_result("logout", true, None, "Logged out")).await?;
        }
        ClientMessage::ListDirectory { request_id, path } => {
            let requested = path.clone().unwrap_or_default();
            let result: Result<ServerMessage, FileSystemError> = async {
                let root = session.user()?;
                let dir = fs.resolver().resolve(root, path.as_deref())?;
                let metadata = tokio::fs::metadata(dir.as_path())
                    .await
                    .map_err(|e| FileSystemError::io(&e, &requested))?;
                if !metadata.is_dir() {
                    return Err(FileSystemError::NotADirectory {
                        path: dir.display_path(),
                    });
                }
                let listing = fs.lister().list(&dir).await;
                Ok(ServerMessage::DirectoryListing {
                    request_id: request_id.clone(),
                    path: dir.display_path(),
                    parent: dir.parent().map(|p| p.display_path()),
                    breadcrumbs: breadcrumbs::build(root, &dir)
                        .iter()
                        .map(BreadcrumbItem::from)
                        .collect(),
                    folders: listing.folders,
                    files: listing.files,
                })
            }
            .await;
            reply(tx, state, request_id, "list_directory", &requested, result).await?;
        }
        ClientMessage::GetFileInfo { request_id, path } => {
            let result: Result<ServerMessage, FileSystemError> = async {
                let root = session.user()?;
                let target = fs.resolver().resolve(root, Some(&path))?;
                let entry = fs.lister().describe(&target).await?;
                Ok(ServerMessage::FileInfo {
                    request_id: request_id.clone(),
                    entry,
                })
            }
            .await;
            reply(tx, state, request_id, "get_file_info", &path, result).await?;
        }
        ClientMessage::CreateFolder {
            request_id,
            parent,
            name,
        } => {
            let requested = parent.clone().unwrap_or_default();
            let result: Result<ServerMessage, FileSystemError> = async {
                let root = session.user()?;
                let name = entry_name(&name)?;
                let dir = fs.resolver().resolve(root, parent.as_deref())?;
                let created = fs.ops().create_folder(&dir, &name).await?;
                Ok(operation_success(
                    request_id.clone(),
                    "create_folder",
                    created.display_path(),
                ))
            }
            .await;
            reply(tx, state, request_id, "create_folder", &requested, result).await?;
        }
        ClientMessage::CreateFile {
            request_id,
            parent,
            name,
        } => {
            let requested = parent.clone().unwrap_or_default();
            let result: Result<ServerMessage, FileSystemError> = async {
                let root = session.user()?;
                let name = entry_name(&name)?;
                let dir = fs.resolver().resolve(root, parent.as_deref())?;
                let created = fs.ops().create_file(&dir, &name).await?;
                Ok(operation_success(
                    request_id.clone(),
                    "create_file",
                    created.display_path(),
                ))
            }
            .await;
            reply(tx, state, request_id, "create_file", &requested, result).await?;
        }
        ClientMessage::UploadFile {
            request_id,
            parent,
            file_name,
            content_base64,
        } => {
            let requested = parent.clone().unwrap_or_default();
            let result: Result<ServerMessage, FileSystemError> = async {
                let root = session.user()?;
                let name = entry_name(&file_name)?;
                let dir = fs.resolver().resolve(root, parent.as_deref())?;
                let data = BASE64
                    .decode(content_base64.as_bytes())
                    .map_err(|e| FileSystemError::IoError {
                        message: format!("invalid upload payload: {}", e),
                    })?;
                let max_size = fs.config().max_upload_size;
                if data.len() as u64 > max_size {
                    return Err(FileSystemError::FileTooLarge {
                        path: name,
                        size: data.len() as u64,
                        max_size,
                    });
                }
                let (stored, written) = fs.ops().upload_file(&dir, &name, data.as_slice()).await?;
                Ok(ServerMessage::OperationSuccess {
                    request_id: request_id.clone(),
                    operation: "upload_file".to_string(),
                    path: stored.display_path(),
                    message: Some(format!("{} bytes", written)),
                })
            }
            .await;
            reply(tx, state, request_id, "upload_file", &requested, result).await?;
        }
        ClientMessage::ReadFile { request_id, path } => {
            let result: Result<ServerMessage, FileSystemError> = async {
                let root = session.user()?;
                let target = fs.resolver().resolve(root, Some(&path))?;
                let text = fs.ops().read_file_for_edit(&target).await?;
                Ok(ServerMessage::FileContent {
                    request_id: request_id.clone(),
                    path: target.display_path(),
                    content: text.content,
                    encoding: text.encoding,
                })
            }
            .await;
            reply(tx, state, request_id, "read_file", &path, result).await?;
        }
        ClientMessage::SaveFile {
            request_id,
            path,
            content,
        } => {
            let result: Result<ServerMessage, FileSystemError> = async {
                let root = session.user()?;
                let target = fs.resolver().resolve_target(root, &path)?;
                fs.ops().save_file(&target, &content).await?;
                Ok(operation_success(
                    request_id.clone(),
                    "save_file",
                    target.display_path(),
                ))
            }
            .await;
            reply(tx, state, request_id, "save_file", &path, result).await?;
        }
        ClientMessage::DeleteFile { request_id, path } => {
            let result: Result<ServerMessage, FileSystemError> = async {
                let root = session.user()?;
                let target = fs.resolver().resolve_entry(root, &path)?;
                fs.ops().delete_file(&target).await?;
                Ok(operation_success(
                    request_id.clone(),
                    "delete_file",
                    target.display_path(),
                ))
            }
            .await;
            reply(tx, state, request_id, "delete_file", &path, result).await?;
        }
        ClientMessage::DeleteFolder { request_id, path } => {
            let result: Result<ServerMessage, FileSystemError> = async {
                let root = session.user()?;
                let target = fs.resolver().resolve_entry(root, &path)?;
                fs.ops().delete_folder(&target).await?;
                Ok(operation_success(
                    request_id.clone(),
                    "delete_folder",
                    target.display_path(),
                ))
            }
            .await;
            reply(tx, state, request_id, "delete_folder", &path, result).await?;
        }
        ClientMessage::RenamePath {
            request_id,
            path,
            new_name,
        } => {
            let result: Result<ServerMessage, FileSystemError> = async {
                let root = session.user()?;
                let new_name = entry_name(&new_name)?;
                let target = fs.resolver().resolve_entry(root, &path)?;
                let renamed = fs.ops().rename_path(&target, &new_name).await?;
                Ok(operation_success(
                    request_id.clone(),
                    "rename_path",
                    renamed.display_path(),
                ))
            }
            .await;
            reply(tx, state, request_id, "rename_path", &path, result).await?;
        }
        ClientMessage::DownloadFile {
            request_id,
            path,
            chunk_size,
        } => {
            stream_download(tx, state, session, request_id, path, chunk_size).await?;
        }
        ClientMessage::Search {
            request_id,
            query,
            path,
        } => {
            let requested = path.clone().unwrap_or_default();
            let result: Result<ServerMessage, FileSystemError> = async {
                let root = session.user()?;
                let start = fs.resolver().resolve(root, path.as_deref())?;
                let matches = fs.search().search(&start, &query).await?;
                tracing::debug!(
                    "Search {:?} under {:?}: {} matches",
                    query,
                    start.display_path(),
                    matches.len()
                );
                Ok(ServerMessage::SearchResults {
                    request_id: request_id.clone(),
                    query: query.clone(),
                    paths: matches.iter().map(|m| m.display_path()).collect(),
                })
            }
            .await;
            reply(tx, state, request_id, "search", &requested, result).await?;
        }
    }

    Ok(())
}

fn account_failure(action: &str, username: &str, error: AccountError) -> ServerMessage {
    match error {
        AccountError::Invalid(message) => auth_result(action, false, None, &message),
        other => {
            tracing::error!("{} for {:?} failed: {}", action, username, other);
            auth_result(action, false, None, "Account service unavailable")
        }
    }
}

/// Send a file as a sequence of base64 `file_chunk` messages, each carrying
/// the MD5 of its raw bytes. An empty file is sent as one empty last chunk.
async fn stream_download(
    tx: &mut WsSink,
    state: &SharedState,
    session: &ClientSession,
    request_id: String,
    path: String,
    chunk_size: Option<u64>,
) -> DaemonResult {
    let fs = state.file_system.clone();
    let opened = async {
        let root = session.user()?;
        let target = fs.resolver().resolve(root, Some(&path))?;
        let download = fs.ops().download_file(&target).await?;
        Ok::<_, FileSystemError>((target, download))
    }
    .await;
    let (target, mut download) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            let conceal = fs.config().conceal_access_denied;
            return send_fs_error(tx, request_id, "download_file", &path, e.public(conceal)).await;
        }
    };

    let chunk_size = chunk_size
        .filter(|size| *size > 0)
        .unwrap_or(fs.config().download_chunk_size)
        .clamp(1, MAX_CHUNK_SIZE);
    let total_chunks = download.size.div_ceil(chunk_size).max(1);
    let mut detected_mime = None;

    for chunk_index in 0..total_chunks {
        let data = match download.next_chunk(chunk_size as usize).await {
            Ok(data) => data.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Download of {:?} failed: {}", target.display_path(), e);
                let error = FileSystemError::io(&e, target.display_path());
                return send_fs_error(tx, request_id, "download_file", &path, error).await;
            }
        };
        let mime_type = detected_mime
            .get_or_insert_with(|| mime::detect_mime_type(&data, &download.name))
            .clone();
        let msg = ServerMessage::FileChunk {
            request_id: request_id.clone(),
            path: target.display_path(),
            file_name: download.name.clone(),
            mime_type,
            chunk_index,
            total_chunks,
            total_size: download.size,
            checksum: format!("{:x}", md5::compute(&data)),
            data: BASE64.encode(&data),
            is_last: chunk_index + 1 == total_chunks,
        };
        send(tx, &msg).await?;
    }

    tracing::info!(
        "Sent {:?} to {} ({} bytes)",
        target.display_path(),
        session.addr,
        download.size
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::config::FileSystemConfig;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tokio_tungstenite::{connect_async, MaybeTlsStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn state(temp: &TempDir, config: FileSystemConfig) -> SharedState {
        let file_system = Arc::new(FileSystemService::new(FileSystemConfig {
            root: temp.path().join("users"),
            ..config
        }));
        let store = Arc::new(JsonCredentialStore::new(temp.path().join("users.json")));
        let accounts = Arc::new(AccountService::new(store, file_system.shared_resolver()));
        Arc::new(DaemonState {
            file_system,
            accounts,
        })
    }

    async fn connect(state: SharedState) -> Client {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let _ = handle_connection(stream, peer, state).await;
        });
        let (client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        client
    }

    async fn receive(client: &mut Client) -> Value {
        loop {
            match client.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn request(client: &mut Client, msg: Value) -> Value {
        client.send(Message::Text(msg.to_string())).await.unwrap();
        receive(client).await
    }

    async fn login(client: &mut Client, username: &str, password: &str) {
        let reply = request(
            client,
            json!({"type": "login", "username": username, "password": password}),
        )
        .await;
        assert_eq!(reply["type"], "auth_result");
        assert_eq!(reply["success"], true, "{}", reply);
    }

    #[tokio::test]
    async fn test_requests_before_login_are_unauthorized() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp, FileSystemConfig::default());
        let alice = state
            .accounts
            .create_account("alice", "wonderland")
            .unwrap()
            .unwrap();
        let mut client = connect(state).await;

        let reply = request(
            &mut client,
            json!({"type": "create_folder", "request_id": "1", "parent": "", "name": "Secret"}),
        )
        .await;
        assert_eq!(reply["type"], "operation_error");
        assert_eq!(reply["request_id"], "1");
        assert_eq!(reply["error"], "unauthorized");
        assert_eq!(std::fs::read_dir(alice.path()).unwrap().count(), 0);

        let reply = request(
            &mut client,
            json!({"type": "list_directory", "request_id": "2"}),
        )
        .await;
        assert_eq!(reply["error"], "unauthorized");

        login(&mut client, "alice", "wonderland").await;
        let reply = request(
            &mut client,
            json!({"type": "create_folder", "request_id": "3", "parent": "", "name": "Secret"}),
        )
        .await;
        assert_eq!(reply["type"], "operation_success");
        assert!(alice.path().join("Secret").is_dir());

        let reply = request(&mut client, json!({"type": "logout"})).await;
        assert_eq!(reply["success"], true);
        let reply = request(
            &mut client,
            json!({"type": "delete_folder", "request_id": "4", "path": "Secret"}),
        )
        .await;
        assert_eq!(reply["error"], "unauthorized");
        assert!(alice.path().join("Secret").is_dir());
    }

    #[tokio::test]
    async fn test_traversal_is_reported_as_not_found() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp, FileSystemConfig::default());
        state.accounts.create_account("alice", "wonderland").unwrap();
        state.accounts.create_account("bobby", "builder1").unwrap();
        let mut client = connect(state).await;
        login(&mut client, "alice", "wonderland").await;

        let reply = request(
            &mut client,
            json!({"type": "list_directory", "request_id": "7", "path": "../bobby"}),
        )
        .await;
        assert_eq!(reply["type"], "operation_error");
        assert_eq!(reply["error"], json!({"not_found": {"path": "../bobby"}}));
    }

    #[tokio::test]
    async fn test_traversal_is_access_denied_when_not_concealed() {
        let temp = TempDir::new().unwrap();
        let state = state(
            &temp,
            FileSystemConfig {
                conceal_access_denied: false,
                ..Default::default()
            },
        );
        state.accounts.create_account("alice", "wonderland").unwrap();
        state.accounts.create_account("bobby", "builder1").unwrap();
        let mut client = connect(state).await;
        login(&mut client, "alice", "wonderland").await;

        let reply = request(
            &mut client,
            json!({"type": "read_file", "request_id": "8", "path": "../bobby/notes.txt"}),
        )
        .await;
        assert_eq!(
            reply["error"],
            json!({"access_denied": {"path": "../bobby/notes.txt"}})
        );
    }

    #[tokio::test]
    async fn test_empty_file_downloads_as_single_last_chunk() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp, FileSystemConfig::default());
        let alice = state
            .accounts
            .create_account("alice", "wonderland")
            .unwrap()
            .unwrap();
        std::fs::write(alice.path().join("empty.txt"), b"").unwrap();
        let mut client = connect(state).await;
        login(&mut client, "alice", "wonderland").await;

        let chunk = request(
            &mut client,
            json!({"type": "download_file", "request_id": "9", "path": "empty.txt"}),
        )
        .await;
        assert_eq!(chunk["type"], "file_chunk");
        assert_eq!(chunk["chunk_index"], 0);
        assert_eq!(chunk["total_chunks"], 1);
        assert_eq!(chunk["total_size"], 0);
        assert_eq!(chunk["data"], "");
        assert_eq!(chunk["checksum"], format!("{:x}", md5::compute(b"")));
        assert_eq!(chunk["is_last"], true);
        assert_eq!(chunk["mime_type"], "text/plain");
    }

    #[tokio::test]
    async fn test_download_is_split_into_checksummed_chunks() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp, FileSystemConfig::default());
        let alice = state
            .accounts
            .create_account("alice", "wonderland")
            .unwrap()
            .unwrap();
        std::fs::write(alice.path().join("data.bin"), b"0123456789").unwrap();
        let mut client = connect(state).await;
        login(&mut client, "alice", "wonderland").await;

        let first = request(
            &mut client,
            json!({"type": "download_file", "request_id": "10", "path": "data.bin", "chunk_size": 4}),
        )
        .await;
        let mut chunks = vec![first];
        while chunks.len() < 3 {
            chunks.push(receive(&mut client).await);
        }

        let mut assembled = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk["type"], "file_chunk");
            assert_eq!(chunk["chunk_index"], index);
            assert_eq!(chunk["total_chunks"], 3);
            assert_eq!(chunk["total_size"], 10);
            assert_eq!(chunk["is_last"], index == 2);
            let data = BASE64.decode(chunk["data"].as_str().unwrap()).unwrap();
            assert_eq!(chunk["checksum"], format!("{:x}", md5::compute(&data)));
            assembled.extend(data);
        }
        assert_eq!(assembled, b"0123456789");
    }

    #[tokio::test]
    async fn test_zero_chunk_size_in_config_still_downloads() {
        let temp = TempDir::new().unwrap();
        let state = state(
            &temp,
            FileSystemConfig {
                download_chunk_size: 0,
                ..Default::default()
            },
        );
        let alice = state
            .accounts
            .create_account("alice", "wonderland")
            .unwrap()
            .unwrap();
        std::fs::write(alice.path().join("abc.txt"), b"abc").unwrap();
        let mut client = connect(state).await;
        login(&mut client, "alice", "wonderland").await;

        let first = request(
            &mut client,
            json!({"type": "download_file", "request_id": "11", "path": "abc.txt"}),
        )
        .await;
        assert_eq!(first["type"], "file_chunk");
        assert_eq!(first["total_chunks"], 3);
        receive(&mut client).await;
        let last = receive(&mut client).await;
        assert_eq!(last["is_last"], true);
        assert_eq!(BASE64.decode(last["data"].as_str().unwrap()).unwrap(), b"c");
    }
}
