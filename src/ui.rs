//! Chat page shell.
//!
//! The page is static markup; all behaviour lives in `/static/js/chat.js`,
//! which loads `/history` and streams replies from `/chat`.

/// Title shown in the browser tab and page header.
pub const PAGE_TITLE: &str = "Chat";

const CHAT_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
  <link rel="stylesheet" href="/static/css/chat.css">
</head>
<body>
  <main class="chat-shell">
    <header class="chat-header"><h1>{title}</h1></header>
    <section id="chat-messages" class="chat-messages" aria-live="polite"></section>
    <form id="chat-form" class="chat-form" autocomplete="off">
      <input id="user-input" name="message" type="text" placeholder="Type your message..." required>
      <button type="submit">Send</button>
    </form>
  </main>
  <script src="/static/js/chat.js" defer></script>
</body>
</html>
"#;

/// Render the chat page.
#[must_use]
pub fn chat_page() -> String {
    CHAT_PAGE.replace("{title}", PAGE_TITLE)
}
