use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use crate::app::{App, Focus, Popup};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Tab order; the code buffer only exists in the playground
fn next_focus(focus: Focus, playground: bool) -> Focus {
    match (focus, playground) {
        (Focus::Input, true) => Focus::Code,
        (Focus::Input, false) => Focus::Sidebar,
        (Focus::Code, _) => Focus::Sidebar,
        (Focus::Sidebar, _) => Focus::Transcript,
        (Focus::Transcript, _) => Focus::Input,
    }
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick(),
        AppEvent::Controller(event) => app.on_controller_event(event),
        AppEvent::Status(status) => app.set_status(status),
        AppEvent::CodeFinished(output) => app.code_finished(output),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    // Global keys that work in any mode
    if ctrl && key.code == KeyCode::Char('c') {
        app.should_quit = true;
        return;
    }

    if app.popup.is_some() {
        handle_popup(app, key);
        return;
    }

    if ctrl {
        match key.code {
            KeyCode::Char('n') => app.new_chat(),
            KeyCode::Char('r') => app.regenerate(),
            KeyCode::Char('s') => app.stop(),
            KeyCode::Char('t') => app.switch_mode(),
            KeyCode::Char('d') => app.delete_active(),
            KeyCode::Char('x') => app.popup = Some(Popup::ConfirmDeleteAll),
            KeyCode::Char('e') => app.export(),
            KeyCode::Char('p') => app.toggle_speech(),
            KeyCode::Char('o') if app.in_playground() => app.run_code(),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::F(2) => return app.open_rename(),
        KeyCode::F(5) => return app.open_display_name(),
        KeyCode::F(6) => return app.cycle_animation(),
        KeyCode::F(7) => return app.cycle_language(),
        KeyCode::Tab => {
            app.focus = next_focus(app.focus, app.in_playground());
            return;
        }
        _ => {}
    }

    match app.focus {
        Focus::Sidebar => handle_sidebar(app, key),
        Focus::Transcript => handle_transcript(app, key),
        Focus::Input => handle_input(app, key),
        Focus::Code => handle_code(app, key),
    }
}

fn handle_popup(app: &mut App, key: KeyEvent) {
    match app.popup {
        Some(Popup::Alert(_)) => {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
                app.popup = None;
            }
        }
        Some(Popup::ConfirmDeleteAll) => match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => app.confirm_delete_all(),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.popup = None,
            _ => {}
        },
        Some(Popup::Rename { .. }) | Some(Popup::DisplayName) => match key.code {
            KeyCode::Esc => {
                app.popup = None;
                app.popup_input.clear();
            }
            KeyCode::Enter => app.submit_popup(),
            KeyCode::Backspace => {
                app.popup_input.pop();
            }
            KeyCode::Char(c) => app.popup_input.push(c),
            _ => {}
        },
        None => {}
    }
}

fn handle_sidebar(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.select_chat_offset(1),
        KeyCode::Char('k') | KeyCode::Up => app.select_chat_offset(-1),
        KeyCode::Enter | KeyCode::Right => app.focus = Focus::Input,
        _ => {}
    }
}

fn handle_transcript(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.select_message_offset(1),
        KeyCode::Char('k') | KeyCode::Up => app.select_message_offset(-1),
        KeyCode::PageDown => {
            app.follow_tail = false;
            app.transcript_scroll = app.transcript_scroll.saturating_add(10);
        }
        KeyCode::PageUp => {
            app.follow_tail = false;
            app.transcript_scroll = app.transcript_scroll.saturating_sub(10);
        }
        KeyCode::End | KeyCode::Char('G') => {
            app.follow_tail = true;
            app.selected_message = None;
        }
        KeyCode::Enter | KeyCode::Char(' ') => app.toggle_speech(),
        KeyCode::Esc => app.focus = Focus::Input,
        _ => {}
    }
}

fn handle_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => app.send_input(),
        KeyCode::Backspace => {
            if app.input_cursor > 0 {
                app.input_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.input_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.input_cursor = app.input_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.input_cursor = (app.input_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.input_cursor = 0;
        }
        KeyCode::End => {
            app.input_cursor = app.input.chars().count();
        }
        KeyCode::Esc => {
            app.status = None;
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
            app.input.insert(byte_pos, c);
            app.input_cursor += 1;
        }
        _ => {}
    }
}

fn handle_code(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter => app.code.push('\n'),
        KeyCode::Backspace => {
            app.code.pop();
        }
        KeyCode::Esc => app.focus = Focus::Input,
        KeyCode::Char(c) => app.code.push(c),
        _ => {}
    }
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::ScrollDown => {
            app.follow_tail = false;
            app.transcript_scroll = app.transcript_scroll.saturating_add(3);
        }
        MouseEventKind::ScrollUp => {
            app.follow_tail = false;
            app.transcript_scroll = app.transcript_scroll.saturating_sub(3);
        }
        _ => {}
    }
}
