use std::pin::Pin;

use anyhow::Result;
use futures_util::stream::{self, Stream, StreamExt};

struct LineState<S> {
    inner: Pin<Box<S>>,
    buf: Vec<u8>,
    done: bool,
}

fn take_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(|c| c == '\r' || c == '\n')
        .to_string()
}

/// Split a chunked byte stream into text lines.
///
/// Chunks from the network rarely end on a line boundary, so partial lines are
/// buffered until the newline arrives. A trailing line without a newline is
/// emitted when the stream ends. The first transport error ends the stream.
pub(crate) fn lines<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<anyhow::Error> + Send,
{
    let state = LineState {
        inner: Box::pin(bytes),
        buf: Vec::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                return Some((Ok(take_line(&line)), st));
            }
            if st.done {
                if st.buf.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut st.buf);
                return Some((Ok(take_line(&rest)), st));
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(e.into()), st));
                }
                None => st.done = true,
            }
        }
    })
}
