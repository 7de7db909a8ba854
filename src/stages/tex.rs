//! LaTeX escaping and the printed document template.

use crate::models::JobMetadata;

const DOCUMENT_TEMPLATE: &str = r"\documentclass[12pt,a4paper,oneside]{article}
\usepackage[utf8]{inputenc}
\usepackage[english,russian]{babel}
\usepackage{fancyhdr}
\usepackage{fancyvrb}
\usepackage{lastpage}
\usepackage{latexsym}
\usepackage{amsmath}
\usepackage{color}
\usepackage{alltt}
\usepackage{bold-extra}
\usepackage{marvosym}
\renewcommand{\familydefault}{\ttdefault}
\pagestyle{fancy}
\lhead{(<<computer.id>>) <<computer.name>>}
\chead{}
\rhead{(<<team.id>>) <<team.name>>}
\lfoot{(<<area.id>>) <<area.name>>}
\cfoot{ <<filename>>}
\rfoot{\thepage\ of \pageref{LastPage}}
<<style>>
\hoffset=-20mm
\voffset=-20mm
\setlength\textheight{245mm}
\setlength\textwidth{175mm}
\fancyhfoffset{0cm}
\title{ <<filename>>}
\begin{document}

\begin{center}
\begin{tabular}{|l|p{11cm}|}
\hline
Team & (<<team.id>>) <<team.name>> \\
\hline
Computer & (<<computer.id>>) <<computer.name>> \\
\hline
Location & (<<area.id>>) <<area.name>> \\
\hline
File name & <<filename>> \\
\hline
Contest & (<<contest.id>>) <<contest.name>> \\
\hline
Pages & \pageref{LastPage} \\
\hline
\end{tabular}
\end{center}
\thispagestyle{empty}
<<body>>
\end{document}
";

/// Escape characters LaTeX treats specially in running text.
pub fn tex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | '$' | '_' | '{' | '}' | '#' | '&' => {
                out.push('\\');
                out.push(c);
            }
            '\\' => out.push_str(r"\textbackslash{}"),
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

/// Fill the document template.
///
/// `metadata` is inserted as-is, so callers escape free-text fields first.
/// Every other field is escaped here.
pub fn render_document(metadata: &JobMetadata, style: &str, body: &str) -> String {
    // body must go last: highlighted source may contain marker-like text
    let replacements = [
        ("<<computer.id>>", tex_escape(&metadata.computer.id)),
        ("<<computer.name>>", tex_escape(&metadata.computer.name)),
        ("<<team.id>>", metadata.team.id.to_string()),
        ("<<team.name>>", metadata.team.name.clone()),
        ("<<area.id>>", metadata.area.id.to_string()),
        ("<<area.name>>", tex_escape(&metadata.area.name)),
        ("<<contest.id>>", metadata.contest.id.to_string()),
        ("<<contest.name>>", tex_escape(&metadata.contest.name)),
        ("<<filename>>", metadata.filename.clone()),
        ("<<style>>", style.to_string()),
    ];

    let mut doc = DOCUMENT_TEMPLATE.to_string();
    for (marker, value) in &replacements {
        doc = doc.replace(marker, value);
    }
    doc.replace("<<body>>", body)
}
