use insurance_copilot::{
    ClientConfig, ClientError, Copilot, LogoutReason, MessageRole, MessageStatus,
    PdfSlipRequest, RegisterRequest, SessionEvent, SessionStore, UserRole,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

const HELP: &str = "\
/login <email> <password>     iniciar sesión
/register <email> <password> [nombre]
/logout                       cerrar sesión
/threads                      listar sesiones
/new [título]                 nueva sesión
/open <id>                    abrir sesión
/rename <id> <título>         renombrar sesión
/delete <id>                  eliminar sesión
/pdf <archivo>                exportar la última respuesta como slip PDF
/help                         esta ayuda
/quit                         salir
Cualquier otra línea se envía al asistente.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("insurance_copilot=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env();
    let mut copilot = Copilot::build(&config)?;

    let mut events = copilot.session.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::LoggedIn(user)) => {
                    println!("Sesión iniciada como {} ({})", user.email, user.role.as_str())
                }
                Ok(SessionEvent::LoggedOut {
                    reason: LogoutReason::SessionExpired,
                }) => println!("Tu sesión expiró. Inicia sesión nuevamente con /login."),
                Ok(SessionEvent::LoggedOut { .. }) => println!("Sesión cerrada."),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if let Err(e) = copilot.start().await {
        eprintln!("No se pudo restaurar la sesión: {e}");
    }
    match copilot.session.current_user().await {
        Some(user) => println!("Hola {}. Escribe /help para ver los comandos.", user.email),
        None => println!("Inicia sesión con /login <email> <password>."),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = handle_line(&copilot, line).await {
            let payload = e.payload();
            eprintln!("[{}] {}", payload.code, payload.message);
        }
    }
    Ok(())
}

async fn handle_line(copilot: &Copilot, line: &str) -> Result<(), ClientError> {
    let session = &copilot.session;
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();

    match command {
        "/help" => println!("{HELP}"),
        "/login" => {
            let (Some(email), Some(password)) = (args.next(), args.next()) else {
                println!("Uso: /login <email> <password>");
                return Ok(());
            };
            session.login(email, password).await?;
            print_threads(session, session.load_threads().await?.len());
        }
        "/register" => {
            let (Some(email), Some(password)) = (args.next(), args.next()) else {
                println!("Uso: /register <email> <password> [nombre]");
                return Ok(());
            };
            let request = RegisterRequest {
                email: email.to_string(),
                password: password.to_string(),
                username: args.next().map(str::to_string),
                role: UserRole::default(),
            };
            let user = session.register(&request).await?;
            println!("Cuenta creada para {}. Ahora usa /login.", user.email);
        }
        "/logout" => session.logout().await,
        "/threads" => {
            let count = session.load_threads().await?.len();
            print_threads(session, count);
        }
        "/new" => {
            let thread = session.create_thread(rest).await?;
            println!("Nueva sesión {} ({})", thread.title, thread.id);
        }
        "/open" => {
            let Some(id) = args.next() else {
                println!("Uso: /open <id>");
                return Ok(());
            };
            let thread = session.load_thread(id).await?;
            println!("== {} ==", thread.title);
            for message in &thread.messages {
                print_message(message);
            }
        }
        "/rename" => {
            let Some((id, title)) = rest.split_once(char::is_whitespace) else {
                println!("Uso: /rename <id> <título>");
                return Ok(());
            };
            let thread = session.rename_thread(id, title).await?;
            println!("Renombrada a {}", thread.title);
        }
        "/delete" => {
            let Some(id) = args.next() else {
                println!("Uso: /delete <id>");
                return Ok(());
            };
            session.delete_thread(id).await?;
            print_threads(session, session.snapshot().threads.len());
        }
        "/pdf" => {
            let Some(path) = args.next() else {
                println!("Uso: /pdf <archivo>");
                return Ok(());
            };
            export_last_answer(copilot, path).await?;
        }
        _ if command.starts_with('/') => println!("Comando desconocido. Escribe /help."),
        _ => {
            let reply = session.send_message(line).await?;
            print_message(&reply);
        }
    }
    Ok(())
}

fn print_threads(session: &SessionStore, count: usize) {
    let snapshot = session.snapshot();
    println!("{count} sesiones");
    for thread in &snapshot.threads {
        let marker = if snapshot.current_thread_id.as_deref() == Some(thread.id.as_str()) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {}  {}  ({})",
            thread.id,
            thread.title,
            thread.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn print_message(message: &insurance_copilot::Message) {
    let who = match message.role {
        MessageRole::User => "tú",
        MessageRole::Assistant => "copiloto",
    };
    let flag = match message.status {
        MessageStatus::Sending => " (enviando)",
        MessageStatus::Sent => "",
        MessageStatus::Error => " (error)",
    };
    println!("{who}{flag}: {}", message.content);
    if let Some(rows) = message.metadata.as_ref().and_then(|m| m.comparison_rows()) {
        for row in rows {
            println!("  - {}: {} | {}", row.insurer, row.premium, row.coverage);
        }
    }
    if !message.sources.is_empty() {
        println!("  fuentes: {}", message.sources.join(", "));
    }
}

async fn export_last_answer(copilot: &Copilot, path: &str) -> Result<(), ClientError> {
    let snapshot = copilot.session.snapshot();
    let Some(thread) = snapshot.current_thread() else {
        return Err(ClientError::NoActiveThread);
    };
    let Some(answer) = thread
        .messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::Assistant && m.status == MessageStatus::Sent)
    else {
        println!("No hay respuestas para exportar.");
        return Ok(());
    };

    let pdf = copilot
        .quotes
        .export_slip(&PdfSlipRequest::from_message(thread.title.clone(), answer))
        .await?;
    tokio::fs::write(path, &pdf)
        .await
        .map_err(|e| ClientError::Storage(e.into()))?;
    println!("Slip guardado en {path} ({} bytes)", pdf.len());
    Ok(())
}
