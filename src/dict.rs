//! Built-in dictionary and prediction expansion

/// Common subdomain prefixes used when no dictionary file is supplied.
pub fn default_words() -> impl Iterator<Item = &'static str> {
    DEFAULT_WORDS.iter().copied()
}

/// Derived variants for one dictionary word: numeric suffixes plus the
/// usual environment prefixes. Bounded so prediction cannot blow up the
/// candidate count.
pub fn predict_variants(word: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(10);
    for n in 1..=3u32 {
        out.push(format!("{}{}", word, n));
        out.push(format!("{}{:02}", word, n));
    }
    for prefix in ["dev", "test", "staging", "uat"] {
        if word != prefix && !word.starts_with(prefix) {
            out.push(format!("{}-{}", prefix, word));
        }
    }
    out
}

const DEFAULT_WORDS: &[&str] = &[
    "www", "mail", "email", "webmail", "smtp", "pop", "pop3", "imap", "mx", "mx1", "mx2",
    "exchange", "owa", "ns", "ns1", "ns2", "ns3", "dns", "ftp", "sftp", "vpn", "remote",
    "gateway", "gw", "proxy", "firewall", "api", "api-dev", "apps", "app", "portal", "admin",
    "manage", "console", "dashboard", "panel", "cpanel", "whm", "blog", "news", "forum", "bbs",
    "wiki", "docs", "doc", "help", "support", "faq", "kb", "dev", "test", "testing", "stage",
    "staging", "uat", "qa", "demo", "beta", "alpha", "preview", "sandbox", "lab", "labs", "old",
    "new", "legacy", "backup", "bak", "cdn", "static", "assets", "img", "images", "image",
    "media", "video", "live", "stream", "upload", "uploads", "download", "downloads", "files",
    "file", "share", "cloud", "storage", "s3", "db", "database", "mysql", "postgres", "redis",
    "mongo", "es", "elastic", "search", "solr", "auth", "sso", "login", "id", "idp", "account",
    "accounts", "oauth", "pay", "payment", "billing", "invoice", "shop", "store", "cart", "m",
    "mobile", "wap", "intranet", "internal", "corp", "office", "oa", "crm", "erp", "hr", "jira",
    "confluence", "git", "gitlab", "svn", "jenkins", "ci", "cd", "build", "deploy", "registry",
    "harbor", "nexus", "repo", "mirror", "monitor", "monitoring", "grafana", "prometheus",
    "zabbix", "nagios", "status", "stats", "analytics", "metrics", "log", "logs", "kibana",
    "sentry", "trace", "ntp", "time", "ldap", "radius", "sip", "voip", "pbx", "chat", "im",
    "meet", "video-conf", "webdisk", "autodiscover", "autoconfig", "mta", "relay", "list",
    "lists", "newsletter", "track", "tracking", "ads", "ad", "promo", "events", "careers",
    "jobs", "partner", "partners", "developer", "developers", "open", "data", "report",
    "reports", "survey", "feedback",
];
