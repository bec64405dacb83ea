use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use cognito_core::{BackgroundAnimation, Message, Role, Transition};
use crate::app::{App, Focus, Popup};

/// Ensure the selected item in a list is visible by adjusting the ListState offset.
fn ensure_selected_visible(state: &mut ListState, visible_height: usize) {
    let visible_height = visible_height.max(1);

    if let Some(selected) = state.selected() {
        let min_offset = selected.saturating_sub(visible_height - 1);
        let new_offset = state.offset().clamp(min_offset, selected);
        if new_offset != state.offset() {
            *state.offset_mut() = new_offset;
        }
    }
}

/// Wrap text to fit within a given width, returning multiple lines
/// Uses word boundaries for wrapping (doesn't break mid-word)
fn wrap_text_to_width(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if current_len == 0 {
            current_line = word.to_string();
            current_len = word_len;
        } else if current_len + 1 + word_len <= width {
            current_line.push(' ');
            current_line.push_str(word);
            current_len += 1 + word_len;
        } else {
            lines.push(std::mem::take(&mut current_line));
            current_line = word.to_string();
            current_len = word_len;
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            chars.next();

            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            let mut bold_text = String::new();
            let mut found_close = false;
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // Unclosed, keep the markers literally
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// A short decorative strip for the header, advanced once per tick
fn flourish(animation: BackgroundAnimation, frame: u64, width: usize) -> String {
    let glyphs: &[char] = match animation {
        BackgroundAnimation::Particles => &['·', '•', '∘', ' '],
        BackgroundAnimation::Starfield => &['✦', ' ', '·', ' ', ' '],
        BackgroundAnimation::Aurora => &['░', '▒', '▓', '▒'],
        BackgroundAnimation::Off => return String::new(),
    };
    (0..width)
        .map(|i| glyphs[(i + frame as usize) % glyphs.len()])
        .collect()
}

/// "Thinking", "Thinking.", "Thinking.." ... cycling with the tick
fn thinking_label(base: &str, frame: u64) -> String {
    format!("{}{}", base, ".".repeat((frame % 4) as usize))
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, status, footer
    let [header_area, body_area, status_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let [sidebar_area, main_area] = Layout::horizontal([
        Constraint::Length(28),
        Constraint::Min(20),
    ])
    .areas(body_area);

    render_sidebar(app, frame, sidebar_area);

    if app.in_playground() {
        let [chat_area, play_area] = Layout::horizontal([
            Constraint::Percentage(50),
            Constraint::Percentage(50),
        ])
        .areas(main_area);
        render_chat(app, frame, chat_area);
        render_playground(app, frame, play_area);
    } else {
        render_chat(app, frame, main_area);
    }

    render_status(app, frame, status_area);
    render_footer(app, frame, footer_area);

    if app.snapshot.transition != Transition::None {
        render_transition(app, frame, area);
    }

    if let Some(popup) = app.popup.clone() {
        render_popup(app, &popup, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let greeting = match app.config.display_name.as_deref() {
        Some(name) if !name.trim().is_empty() => app.t("app.greeting").replace("{name}", name),
        _ => String::new(),
    };

    let mut spans = vec![
        Span::styled(format!(" {} ", app.t("app.name")), Style::default().fg(Color::Cyan).bold()),
        Span::styled(greeting, Style::default().fg(Color::White)),
        Span::raw("  "),
        Span::styled(app.model_label.clone(), Style::default().fg(Color::Gray)),
        Span::raw(" "),
    ];

    let used: usize = spans.iter().map(|s| s.content.chars().count()).sum();
    let remaining = (area.width as usize).saturating_sub(used);
    spans.push(Span::styled(
        flourish(app.animation(), app.frame, remaining),
        Style::default().fg(Color::DarkGray),
    ));

    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(header, area);
}

fn render_sidebar(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == Focus::Sidebar;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" {} ({}) ", app.t("sidebar.title"), app.snapshot.chats.len()));

    if app.snapshot.chats.is_empty() {
        let placeholder = Paragraph::new(app.t("sidebar.empty"))
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(placeholder, area);
        return;
    }

    let generating_chat = app
        .snapshot
        .generating
        .then(|| app.snapshot.active_chat_id.clone())
        .flatten();

    let width = area.width.saturating_sub(4) as usize;
    let items: Vec<ListItem> = app
        .snapshot
        .chats
        .iter()
        .map(|chat| {
            let mut title: String = chat.title.chars().take(width.saturating_sub(2)).collect();
            if generating_chat.as_deref() == Some(chat.id.as_str()) {
                title.push_str(" …");
            }
            ListItem::new(title)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let visible_height = area.height.saturating_sub(2) as usize;
    ensure_selected_visible(&mut app.sidebar_state, visible_height);
    frame.render_stateful_widget(list, area, &mut app.sidebar_state);
}

/// Marker after a model label showing the speech state of that message
fn speech_marker(app: &App, message: &Message) -> Option<(String, Color)> {
    let speech = &app.snapshot.speech;
    if speech.is_playing(&message.id) {
        Some((format!(" ♪ {}", app.t("chat.speaking")), Color::Green))
    } else if speech.is_paused(&message.id) {
        Some((format!(" ‖ {}", app.t("chat.paused")), Color::Yellow))
    } else if app.snapshot.synthesizing.contains(&message.id) {
        Some((format!(" … {}", app.t("chat.synthesizing")), Color::Magenta))
    } else {
        None
    }
}

fn transcript_lines(app: &App, width: usize) -> (Vec<Line<'static>>, Option<usize>) {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut selected_start = None;

    let Some(chat) = app.active_chat() else {
        lines.push(Line::styled(app.t("chat.empty"), Style::default().fg(Color::DarkGray)));
        return (lines, None);
    };
    if chat.messages.is_empty() {
        lines.push(Line::styled(app.t("chat.empty"), Style::default().fg(Color::DarkGray)));
        return (lines, None);
    }

    let last = chat.messages.len() - 1;
    for (idx, message) in chat.messages.iter().enumerate() {
        let selected = app.selected_message == Some(idx);
        if selected {
            selected_start = Some(lines.len());
        }

        let (label, color) = match message.role {
            Role::User => (app.t("chat.you"), Color::Cyan),
            Role::Model => (app.t("chat.model"), Color::Green),
        };
        let mut label_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
        if selected {
            label_style = label_style.add_modifier(Modifier::REVERSED);
        }

        let mut header = vec![Span::styled(format!("{}:", label), label_style)];
        if let Some((marker, marker_color)) = speech_marker(app, message) {
            header.push(Span::styled(marker, Style::default().fg(marker_color)));
        }
        lines.push(Line::from(header));

        if message.content.is_empty() && message.role == Role::Model && idx == last && app.snapshot.generating {
            lines.push(Line::styled(
                thinking_label(&app.t("chat.thinking"), app.frame),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC),
            ));
        } else {
            for raw in message.content.lines() {
                if raw.trim().is_empty() {
                    lines.push(Line::default());
                    continue;
                }
                for wrapped in wrap_text_to_width(raw, width) {
                    lines.push(parse_markdown_line(&wrapped));
                }
            }
        }
        lines.push(Line::default());
    }

    (lines, selected_start)
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let [transcript_area, input_area] = Layout::vertical([
        Constraint::Min(3),
        Constraint::Length(3),
    ])
    .areas(area);

    let focused = app.focus == Focus::Transcript;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };
    let title = app
        .active_chat()
        .map(|c| format!(" {} ", c.title))
        .unwrap_or_default();

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let inner_width = transcript_area.width.saturating_sub(2) as usize;
    let inner_height = transcript_area.height.saturating_sub(2) as usize;
    let (lines, selected_start) = transcript_lines(app, inner_width);

    let max_scroll = lines.len().saturating_sub(inner_height) as u16;
    if app.follow_tail {
        app.transcript_scroll = max_scroll;
    } else if let Some(start) = selected_start {
        let start = start as u16;
        if start < app.transcript_scroll || start >= app.transcript_scroll + inner_height as u16 {
            app.transcript_scroll = start;
        }
    }
    app.transcript_scroll = app.transcript_scroll.min(max_scroll);

    let transcript = Paragraph::new(Text::from(lines))
        .block(block)
        .scroll((app.transcript_scroll, 0));
    frame.render_widget(transcript, transcript_area);

    render_input(app, frame, input_area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == Focus::Input;
    let border_color = if app.snapshot.generating {
        Color::Magenta
    } else if focused {
        Color::Yellow
    } else {
        Color::DarkGray
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" {} ", app.t("input.title")));

    // Horizontal scrolling to keep the cursor visible
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app.input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);
    frame.render_widget(input, area);

    if focused && app.popup.is_none() {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_playground(app: &App, frame: &mut Frame, area: Rect) {
    let [code_area, console_area] = Layout::vertical([
        Constraint::Percentage(60),
        Constraint::Percentage(40),
    ])
    .areas(area);

    let code_focused = app.focus == Focus::Code;
    let code_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if code_focused { Color::Yellow } else { Color::DarkGray }))
        .title(format!(" {} ", app.t("playground.code")));

    // Keep the tail of the buffer in view while typing
    let code_lines = app.code.split('\n').count();
    let visible = code_area.height.saturating_sub(2) as usize;
    let code_scroll = code_lines.saturating_sub(visible) as u16;
    let mut code_text = app.code.clone();
    if code_focused {
        code_text.push('▏');
    }
    let code = Paragraph::new(code_text)
        .style(Style::default().fg(Color::White))
        .block(code_block)
        .scroll((code_scroll, 0));
    frame.render_widget(code, code_area);

    let console_color = if app.code_running { Color::Yellow } else { Color::Gray };
    let console_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(format!(" {} ", app.t("playground.console")));
    let console = Paragraph::new(app.console_output.clone())
        .style(Style::default().fg(console_color))
        .block(console_block)
        .wrap(Wrap { trim: false });
    frame.render_widget(console, console_area);
}

fn render_status(app: &App, frame: &mut Frame, area: Rect) {
    let text = if app.snapshot.generating {
        Span::styled(format!(" {}", app.t("input.busy")), Style::default().fg(Color::Magenta))
    } else if let Some(status) = &app.status {
        Span::styled(format!(" {}", status), Style::default().fg(Color::Yellow))
    } else {
        Span::raw("")
    };
    frame.render_widget(Paragraph::new(Line::from(text)), area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = if app.in_playground() {
        (" CODE ", Style::default().bg(Color::Magenta).fg(Color::White))
    } else {
        (" CHAT ", Style::default().bg(Color::Blue).fg(Color::White))
    };
    let help = if app.in_playground() {
        app.t("footer.playground")
    } else {
        app.t("footer.chat")
    };

    let footer = Line::from(vec![
        Span::styled(mode_text, mode_style),
        Span::raw(" "),
        Span::styled(help, Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(Paragraph::new(footer), area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(2));
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn render_transition(app: &App, frame: &mut Frame, area: Rect) {
    let key = match app.snapshot.transition {
        Transition::Entering => "overlay.entering",
        Transition::Exiting => "overlay.exiting",
        Transition::None => return,
    };
    let popup_area = centered(area, 44, 5);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));
    let text = vec![
        Line::from(Span::styled(app.t(key), Style::default().fg(Color::Magenta).bold())),
        Line::from(Span::styled(
            flourish(BackgroundAnimation::Aurora, app.frame, 20),
            Style::default().fg(Color::Magenta),
        )),
    ];
    let overlay = Paragraph::new(text)
        .block(block)
        .alignment(ratatui::layout::Alignment::Center);
    frame.render_widget(overlay, popup_area);
}

fn render_popup(app: &App, popup: &Popup, frame: &mut Frame, area: Rect) {
    let (title, body, color) = match popup {
        Popup::Rename { .. } => (app.t("popup.rename"), Some(app.popup_input.clone()), Color::Cyan),
        Popup::DisplayName => (app.t("popup.displayName"), Some(app.popup_input.clone()), Color::Cyan),
        Popup::ConfirmDeleteAll => (app.t("popup.deleteAll"), None, Color::Red),
        Popup::Alert(message) => (message.clone(), None, Color::Red),
    };

    let popup_width = 60;
    let text_width = popup_width as usize - 4;
    let title_lines = wrap_text_to_width(&title, text_width);
    let height = title_lines.len() as u16 + if body.is_some() { 3 } else { 2 };
    let popup_area = centered(area, popup_width, height);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));

    let mut lines: Vec<Line> = title_lines
        .into_iter()
        .map(|l| Line::from(Span::styled(l, Style::default().fg(color).bold())))
        .collect();
    if let Some(input) = &body {
        lines.push(Line::from(Span::styled(
            format!("{}▏", input),
            Style::default().fg(Color::White),
        )));
    }

    frame.render_widget(Paragraph::new(lines).block(block), popup_area);
}
