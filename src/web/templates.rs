// flowlink — Web UI HTML templates
//
// Inline HTML served as Rust string constants.

/// Placeholder replaced with the (escaped) default workflow path.
pub const WORKFLOW_PATH_SLOT: &str = "{{WORKFLOW_PATH}}";

/// Landing page: runs the configured workflow and shows the step cache.
pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>flowlink</title>
  <style>
    :root {
      --bg: #0f1117;
      --surface: #1a1d27;
      --accent: #6c63ff;
      --ok: #00d4aa;
      --text: #e0e0e0;
      --text-muted: #888;
      --border: #2a2d3a;
      --danger: #ff4757;
    }

    * { margin: 0; padding: 0; box-sizing: border-box; }

    body {
      font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
      background: var(--bg);
      color: var(--text);
      min-height: 100vh;
    }

    header {
      background: var(--surface);
      border-bottom: 1px solid var(--border);
      padding: 1.5rem 2rem;
    }

    header h1 { font-size: 1.5rem; font-weight: 600; color: var(--accent); }
    header p { color: var(--text-muted); font-size: 0.85rem; margin-top: 0.25rem; }

    main { max-width: 960px; margin: 2rem auto; padding: 0 2rem; }

    button {
      background: var(--accent);
      color: #fff;
      border: none;
      border-radius: 8px;
      padding: 0.75rem 1.5rem;
      font-size: 1rem;
      cursor: pointer;
    }

    button:disabled { opacity: 0.5; cursor: wait; }

    #summary { margin: 1rem 0; font-size: 0.9rem; }
    #summary.ok { color: var(--ok); }
    #summary.error { color: var(--danger); }

    pre {
      background: var(--surface);
      border: 1px solid var(--border);
      border-radius: 12px;
      padding: 1.25rem;
      font-size: 0.85rem;
      overflow-x: auto;
      white-space: pre-wrap;
    }
  </style>
</head>
<body>
  <header>
    <h1>flowlink</h1>
    <p>Workflow: <code>{{WORKFLOW_PATH}}</code></p>
  </header>

  <main>
    <button id="run">Run workflow</button>
    <div id="summary"></div>
    <pre id="output">No run yet.</pre>
  </main>

  <script>
    const button = document.getElementById('run');
    const summary = document.getElementById('summary');
    const output = document.getElementById('output');

    button.addEventListener('click', async () => {
      button.disabled = true;
      summary.textContent = 'Running...';
      summary.className = '';
      try {
        const res = await fetch('/api/workflow/run', {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: '{}'
        });
        const body = await res.json();
        output.textContent = JSON.stringify(body, null, 2);
        if (!res.ok) {
          summary.textContent = 'Run failed (' + res.status + '): ' + body.error_message;
          summary.className = 'error';
        } else {
          const failed = Object.entries(body).filter(([, v]) => v && v.status === 'error');
          summary.textContent = failed.length
            ? failed.length + ' step(s) failed: ' + failed.map(([k]) => k).join(', ')
            : 'All steps succeeded.';
          summary.className = failed.length ? 'error' : 'ok';
        }
      } catch (e) {
        summary.textContent = 'Request failed: ' + e;
        summary.className = 'error';
      } finally {
        button.disabled = false;
      }
    });
  </script>
</body>
</html>"#;
