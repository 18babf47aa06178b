use colored::*;

/// `unidl check` 用的控制台输出，服务日志走 tracing
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示信息消息
    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    /// 显示警告消息
    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    /// 显示错误消息
    pub fn error(message: impl AsRef<str>) {
        println!("{} {}", "✗".red().bold(), message.as_ref());
    }

    /// 显示键值信息
    pub fn field(label: impl AsRef<str>, value: impl AsRef<str>) {
        println!("  {}: {}", label.as_ref().bold(), value.as_ref().cyan());
    }

    /// 显示守护进程中一个传输的进度条，总大小未知时不画进度
    pub fn transfer(
        name: impl AsRef<str>,
        state: impl AsRef<str>,
        percentage: Option<f64>,
        rate: impl AsRef<str>,
    ) {
        let bar = match percentage {
            Some(pct) => {
                let bar_width = 30;
                let filled = ((pct / 100.0).clamp(0.0, 1.0) * bar_width as f64) as usize;
                format!(
                    "[{}{}] {:>5.1}%",
                    "█".repeat(filled).green(),
                    "░".repeat(bar_width - filled).bright_black(),
                    pct
                )
            }
            None => "大小未知".bright_black().to_string(),
        };
        println!(
            "  {} {} {} {}",
            format!("{:<8}", state.as_ref()).yellow(),
            name.as_ref().bold(),
            bar,
            rate.as_ref().cyan()
        );
    }

    /// 显示分割线
    pub fn separator() {
        println!("{}", "─".repeat(50).bright_black());
    }

    /// 显示标题
    pub fn title(text: impl AsRef<str>) {
        let text = text.as_ref();
        let width = text.chars().count().min(48);
        let padding = (48 - width) / 2;
        println!(
            "{} {} {}",
            "─".repeat(padding).bright_black(),
            text.bold(),
            "─".repeat(48 - padding - width).bright_black()
        );
    }
}

/// 便捷宏用于漂亮的日志输出
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::success(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::warning(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::error(format!($($arg)*))
    };
}
