use colored::*;
use skillbot::program::StubKind;
use skillbot::{MissionReport, MissionStatus, Op};

/// One-line rendering of a resolved instruction for `list`.
pub fn describe(op: &Op) -> String {
    match op {
        Op::CheckCondition {
            condition,
            if_else,
            if_end,
        } => format!("if {condition} (else -> {if_else}, end -> {if_end})"),
        Op::Repeat {
            until,
            count,
            counter,
            end,
        } => {
            if until.trim().is_empty() {
                format!("repeat {count} times as {counter} (exit -> {end})")
            } else {
                format!("while {until} (exit -> {end})")
            }
        }
        Op::Goto { target, increment } => match increment {
            Some(counter) => format!("{counter} += 1; goto {target}"),
            None => format!("goto {target}"),
        },
        Op::Stub(StubKind::Label(name)) => format!("stub '{name}'"),
        Op::Stub(stub) => format!("stub {stub:?}"),
        Op::CallFunction {
            name, entry, output, ..
        } => format!("call {name} -> {entry} into '{output}'"),
        Op::Return { value } => format!("return {value}"),
        Op::UseSkill {
            name, entry, output, ..
        }
        | Op::OverloadSkill {
            name, entry, output, ..
        } => format!("use skill {name} -> {entry} into '{output}'"),
        Op::ExceptionHandler { args, end } => {
            format!("exception handler '{}' (skip -> {end})", args.cause)
        }
        Op::EndException => "end exception".to_string(),
        Op::Finish => "finish".to_string(),
        Op::Action { kind, .. } => kind.clone(),
    }
}

pub fn print_report(report: &MissionReport) {
    println!();
    println!("{}", "=".repeat(60));
    match report.status {
        MissionStatus::Completed => {
            println!("{} {}", "COMPLETED:".green().bold(), report.skill)
        }
        MissionStatus::Failed => println!("{} {}", "FAILED:".red().bold(), report.skill),
        MissionStatus::Cancelled => {
            println!("{} {}", "CANCELLED:".yellow().bold(), report.skill)
        }
    }
    println!("{}", "-".repeat(60));
    println!("   Steps executed: {}", report.steps_executed);
    println!("   Duration: {:.2}s", report.duration_ms as f64 / 1000.0);
    if let Some(error) = &report.last_error {
        println!("{} {}", "   Last error:".yellow(), error);
    }
    println!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_counted_and_guarded_loops() {
        let counted = Op::Repeat {
            until: String::new(),
            count: "3".into(),
            counter: "i".into(),
            end: 9,
        };
        assert_eq!(describe(&counted), "repeat 3 times as i (exit -> 9)");

        let guarded = Op::Repeat {
            until: "n < 5".into(),
            count: String::new(),
            counter: "lc_0_2".into(),
            end: 4,
        };
        assert_eq!(describe(&guarded), "while n < 5 (exit -> 4)");
        assert_eq!(
            describe(&Op::Goto {
                target: 1,
                increment: Some("i".into())
            }),
            "i += 1; goto 1"
        );
    }
}
