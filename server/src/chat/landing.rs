use axum::response::Html;

/// GET /
/// Minimal browser client for picking a room and chatting in it.
pub async fn client_page() -> Html<&'static str> {
    Html(CLIENT_PAGE)
}

const CLIENT_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Roomchat</title>
  <style>
    body { font-family: system-ui, sans-serif; margin: 0; display: flex; height: 100vh; background: #f4f4f6; }
    aside { width: 200px; padding: 1rem; background: #1f2430; color: #eee; }
    aside li { cursor: pointer; padding: 0.25rem 0; list-style: none; }
    aside li.active { font-weight: bold; color: #8fd3ff; }
    main { flex: 1; display: flex; flex-direction: column; padding: 1rem; }
    #log { flex: 1; overflow-y: auto; background: #fff; border-radius: 6px; padding: 0.75rem; }
    .system { color: #777; font-style: italic; }
    .error { color: #c0392b; }
    #typing { height: 1.2rem; color: #999; font-size: 0.85rem; }
    form { display: flex; gap: 0.5rem; margin-top: 0.5rem; }
    input { flex: 1; padding: 0.5rem; }
  </style>
</head>
<body>
  <aside>
    <h3>Rooms</h3>
    <ul id="rooms"></ul>
    <form id="join"><input id="room" placeholder="room name" required></form>
  </aside>
  <main>
    <div id="log"></div>
    <div id="typing"></div>
    <form id="send"><input id="text" placeholder="message" autocomplete="off"><button>Send</button></form>
  </main>
  <script>
    const log = document.getElementById("log");
    const typing = document.getElementById("typing");
    let ws = null, current = null, username = null, typingTimer = null;

    function line(text, cls) {
      const div = document.createElement("div");
      if (cls) div.className = cls;
      div.textContent = text;
      log.appendChild(div);
      log.scrollTop = log.scrollHeight;
    }

    function renderRooms(names) {
      const list = document.getElementById("rooms");
      list.innerHTML = "";
      for (const name of names || []) {
        const li = document.createElement("li");
        li.textContent = name;
        if (name === current) li.className = "active";
        li.onclick = () => connect(name);
        list.appendChild(li);
      }
    }

    async function fetchRooms() {
      const res = await fetch("/rooms");
      if (res.ok) renderRooms(await res.json());
    }

    function connect(room) {
      if (ws) ws.close();
      username = username || prompt("Pick a username (1-20 letters, digits, _)");
      if (!username) return;
      current = room;
      log.innerHTML = "";
      const proto = location.protocol === "https:" ? "wss:" : "ws:";
      ws = new WebSocket(`${proto}//${location.host}/ws?room=${encodeURIComponent(room)}`);
      ws.onopen = () => { ws.send(JSON.stringify({ type: "setUsername", username })); fetchRooms(); };
      ws.onmessage = (evt) => {
        const msg = JSON.parse(evt.data);
        switch (msg.type) {
          case "chat":
            typing.textContent = "";
            line(`${msg.username}: ${msg.content}`, msg.username === "System" ? "system" : "");
            break;
          case "typing":
            if (msg.username !== username) {
              typing.textContent = `${msg.username} is typing...`;
              clearTimeout(typingTimer);
              typingTimer = setTimeout(() => typing.textContent = "", 2000);
            }
            break;
          case "roomList": renderRooms(msg.users); break;
          case "roomAdded": fetchRooms(); break;
          case "error":
            line(msg.content, "error");
            if (msg.content.startsWith("Username")) username = null;
            break;
        }
      };
      ws.onclose = () => line("Disconnected.", "system");
    }

    document.getElementById("join").onsubmit = (e) => {
      e.preventDefault();
      connect(document.getElementById("room").value.trim());
    };
    const text = document.getElementById("text");
    text.oninput = () => {
      if (ws && ws.readyState === WebSocket.OPEN) ws.send(JSON.stringify({ type: "typing" }));
    };
    document.getElementById("send").onsubmit = (e) => {
      e.preventDefault();
      if (!ws || ws.readyState !== WebSocket.OPEN || !text.value) return;
      ws.send(JSON.stringify({ type: "chat", content: text.value }));
      text.value = "";
    };
    fetchRooms();
  </script>
</body>
</html>
"#;
