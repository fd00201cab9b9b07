//! HTML for the update page and the embeddable status widget.
//!
//! Both are static shells that poll `/api/update/status`.

const UPDATE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{{SERVICE}} - Update</title>
<style>
  body { font-family: system-ui, sans-serif; max-width: 640px; margin: 40px auto; color: #222; }
  .card { border: 1px solid #ddd; border-radius: 8px; padding: 16px 20px; margin-bottom: 16px; }
  .row { display: flex; justify-content: space-between; padding: 6px 0; border-bottom: 1px solid #f0f0f0; }
  .row:last-child { border-bottom: none; }
  .label { color: #666; }
  .badge { padding: 2px 10px; border-radius: 12px; font-size: 0.85rem; background: #eee; }
  .badge.available { background: #dbeafe; color: #1e40af; }
  .badge.busy { background: #fef3c7; color: #92400e; }
  .badge.ok { background: #dcfce7; color: #166534; }
  .badge.bad { background: #fee2e2; color: #991b1b; }
  .buttons { display: flex; flex-wrap: wrap; gap: 8px; }
  .hidden { display: none; }
  #alert { padding: 10px 14px; border-radius: 6px; margin-bottom: 16px; background: #f3f4f6; }
</style>
</head>
<body>
<a href="/">&larr; Back</a>
<h1>System Update</h1>
<div id="alert" class="hidden"></div>
<div class="card">
  <div class="row"><span class="label">Current version</span><span id="current">--</span></div>
  <div class="row"><span class="label">Available version</span><span id="target">--</span></div>
  <div class="row"><span class="label">State</span><span id="state" class="badge">loading</span></div>
  <div class="row"><span class="label">Last check</span><span id="checked">--</span></div>
  <div class="row"><span class="label">Last error</span><span id="error">--</span></div>
</div>
<div class="card buttons">
  <button id="btn-check" onclick="post('check')">Check for updates</button>
  <button id="btn-download" class="hidden" onclick="post('download')">Download</button>
  <button id="btn-apply" class="hidden" onclick="confirmPost('apply', 'Install the update and restart?')">Install &amp; restart</button>
  <button id="btn-rollback" class="hidden" onclick="confirmPost('rollback', 'Restore the previous version and restart?')">Rollback</button>
  <button id="btn-enable" class="hidden" onclick="post('enable')">Re-enable updates</button>
</div>
<div class="card"><span class="label">Source</span> <code>{{REPO}}</code> <span id="source"></span></div>
<script>
const BUSY = ['checking', 'downloading', 'applying', 'applied', 'rolling_back'];

function show(id, visible) { document.getElementById(id).classList.toggle('hidden', !visible); }

function alertMsg(text) {
  const el = document.getElementById('alert');
  el.textContent = text;
  el.classList.remove('hidden');
  setTimeout(() => el.classList.add('hidden'), 5000);
}

function render(s) {
  document.getElementById('current').textContent = s.current_version || '--';
  document.getElementById('target').textContent = s.target_version || '--';
  document.getElementById('checked').textContent = s.last_checked_at ? new Date(s.last_checked_at).toLocaleString() : '--';
  document.getElementById('error').textContent = s.last_error || '--';
  document.getElementById('source').textContent = s.source ? '(' + s.source + ')' : '';

  const badge = document.getElementById('state');
  let cls = 'badge', text = s.state;
  if (s.degraded) { cls += ' bad'; text = 'degraded'; }
  else if (s.updates_disabled) { cls += ' bad'; text = 'disabled'; }
  else if (BUSY.includes(s.state)) { cls += ' busy'; }
  else if (s.state === 'update_available' || s.state === 'downloaded') { cls += ' available'; }
  else if (s.version_comparison === 'up_to_date') { cls += ' ok'; text = 'up to date'; }
  badge.className = cls;
  badge.textContent = text;

  show('btn-check', s.state === 'idle' && !s.updates_disabled);
  show('btn-download', s.state === 'update_available' && !s.updates_disabled);
  show('btn-apply', s.state === 'downloaded' && !s.updates_disabled);
  show('btn-rollback', !!s.can_rollback);
  show('btn-enable', !!s.updates_disabled);
}

async function load() {
  try {
    const res = await fetch('/api/update/status');
    const s = await res.json();
    render(s);
    return s;
  } catch (e) {
    alertMsg('Status unavailable: ' + e.message);
  }
}

async function post(action) {
  try {
    const res = await fetch('/api/update/' + action, { method: 'POST' });
    const data = await res.json();
    if (!data.success) alertMsg(data.error);
  } catch (e) {
    alertMsg('Request failed (the service may be restarting): ' + e.message);
  }
  poll();
}

function confirmPost(action, question) { if (confirm(question)) post(action); }

async function poll() {
  const s = await load();
  if (!s || BUSY.includes(s.state)) setTimeout(poll, 2000);
}

poll();
setInterval(load, 30000);
</script>
</body>
</html>
"#;

const STATUS_WIDGET: &str = r#"<div class="card" id="status-widget">
  <div class="status-row"><span class="status-label">Version</span><span class="status-value" id="sw-version">--</span></div>
  <div class="status-row"><span class="status-label">Memory</span><span class="status-value" id="sw-memory">--</span></div>
  <div class="status-row" id="sw-update-row" style="display: none;">
    <span class="status-label">Update</span><a href="/update" class="status-value">Available</a>
  </div>
  <div class="status-row">
    <a href="/update">System update</a>
    <button onclick="fetch('/api/restart', { method: 'POST' })">Restart</button>
  </div>
  <script>
    fetch('/api/update/status').then(r => r.json()).then(s => {
      document.getElementById('sw-version').textContent = s.current_version || '--';
      document.getElementById('sw-memory').textContent = s.memory_mb ? s.memory_mb + ' MB' : '--';
      if (s.state === 'update_available' || s.state === 'downloaded') {
        document.getElementById('sw-update-row').style.display = '';
      }
    });
  </script>
</div>
"#;

/// The update management page
pub fn update_page(service: &str, repo: &str) -> String {
    UPDATE_PAGE
        .replace("{{SERVICE}}", &escape_html(service))
        .replace("{{REPO}}", &escape_html(repo))
}

/// The status widget fragment
pub fn status_widget() -> String {
    STATUS_WIDGET.to_string()
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
