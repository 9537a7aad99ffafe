use std::error::Error;
use tokio::io::{ AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader };
use tokio_util::sync::CancellationToken;

use crate::session::ConversationSession;

const BANNER: &str = "Course advisor chat. Type 'exit' or 'quit' to leave.\n";

/// Chats on stdin/stdout until EOF, `exit`, or shutdown.
pub async fn run(session: ConversationSession, shutdown: CancellationToken) -> Result<(), Box<dyn Error + Send + Sync>> {
    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();
    chat_loop(&session, input, output, &shutdown).await
}

/// One conversation thread is opened up front and kept for the whole loop.
/// The session's store must not expire it while the loop runs.
pub async fn chat_loop<R, W>(
    session: &ConversationSession,
    input: R,
    mut output: W,
    shutdown: &CancellationToken
) -> Result<(), Box<dyn Error + Send + Sync>>
    where R: AsyncBufRead + Unpin, W: AsyncWrite + Unpin
{
    let mut lines = input.lines();
    let thread_id = session.open_conversation().await?;

    output.write_all(BANNER.as_bytes()).await?;
    loop {
        output.write_all(b"\nYou: ").await?;
        output.flush().await?;

        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
            break;
        }

        match session.send_message(text, Some(&thread_id), shutdown).await {
            Ok(reply) => {
                output.write_all(format!("Agent: {}\n", reply.reply).as_bytes()).await?;
            }
            Err(e) => {
                output.write_all(format!("Error: {}\n", e).as_bytes()).await?;
            }
        }
    }

    output.write_all(b"\nGoodbye!\n").await?;
    output.flush().await?;
    Ok(())
}
