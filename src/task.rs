//! Task Family (§4.4): the service-specialized Task variants selected by
//! a factory from a `TaskDefinition`'s `service` attribute.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ast::{ClassDef, ClassMember, Expr, Literal};
use crate::diagnostics::{attribute_error, Diagnostic};

pub mod limits {
    use super::*;

    /// ECS Fargate's documented cpu (vCPU units) -> allowed memory (MB)
    /// pairs. Fixed AWS facts, not user-tunable config.
    pub static ECS_CPU_MEMORY_PAIRS: Lazy<HashMap<u32, Vec<u32>>> = Lazy::new(|| {
        let mut m = HashMap::new();
        m.insert(256, vec![512, 1024, 2048]);
        m.insert(512, vec![1024, 1536, 2048, 3072, 4096]);
        m.insert(1024, vec![2048, 3072, 4096, 5120, 6144, 7168, 8192]);
        m.insert(2048, (4096..=16384).step_by(1024).collect());
        m.insert(4096, (8192..=30720).step_by(1024).collect());
        m
    });

    pub const LAMBDA_MIN_MEMORY_MB: u32 = 128;
    pub const LAMBDA_MAX_MEMORY_MB: u32 = 10240;
    pub const LAMBDA_MEMORY_STEP_MB: u32 = 64;

    pub fn is_valid_lambda_memory(mb: u32) -> bool {
        mb >= LAMBDA_MIN_MEMORY_MB
            && mb <= LAMBDA_MAX_MEMORY_MB
            && mb % LAMBDA_MEMORY_STEP_MB == 0
    }

    pub fn is_valid_ecs_cpu_memory(cpu: u32, memory: u32) -> bool {
        ECS_CPU_MEMORY_PAIRS
            .get(&cpu)
            .map(|allowed| allowed.contains(&memory))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Service {
    Lambda,
    LambdaPexpmRunner,
    Ecs,
    EcsWorker,
}

impl Service {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "lambda" => Some(Service::Lambda),
            "lambda:pexpm-runner" => Some(Service::LambdaPexpmRunner),
            "ecs" => Some(Service::Ecs),
            "ecs:worker" => Some(Service::EcsWorker),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Lambda => "lambda",
            Service::LambdaPexpmRunner => "lambda:pexpm-runner",
            Service::Ecs => "ecs",
            Service::EcsWorker => "ecs:worker",
        }
    }

    pub fn is_ecs_family(&self) -> bool {
        matches!(self, Service::Ecs | Service::EcsWorker)
    }

    /// (b) in §4.4: only `lambda*` services can return a value into `data`.
    pub fn allows_result_path(&self) -> bool {
        matches!(self, Service::Lambda | Service::LambdaPexpmRunner)
    }

    /// (a) in §4.4: the ASL `Resource` field. The actual ARN format is an
    /// external packaging concern; this returns the logical resource
    /// pointer the downstream serializer expands.
    pub fn compute_resource(&self, task: &TaskDefinition) -> String {
        match self {
            Service::Lambda => format!("arn:aws:lambda:::function:{}", task.name),
            Service::LambdaPexpmRunner => "arn:aws:lambda:::function:pexpm-runner".to_string(),
            Service::Ecs => "arn:aws:states:::ecs:runTask.sync".to_string(),
            Service::EcsWorker => "arn:aws:states:::ecs:runTask.waitForTaskToken".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub service: Service,
    pub timeout: u32,
    pub cpu: u32,
    pub memory: u32,
    /// Verbatim source of the task's entry method; absent for
    /// `ecs:worker`, which ignores `run_body` entirely (§4.4).
    pub run_body: Option<String>,
    /// `"package.module:Class"`; required for `ecs:worker`.
    pub spec: Option<String>,
    pub concurrency: u32,
    pub heartbeat_interval: Option<u32>,
    pub autoscaling_min: Option<u32>,
    pub autoscaling_max: Option<u32>,
}

fn literal_str(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Literal(Literal::Str(s), _) => Some(s.as_str()),
        _ => None,
    }
}

fn literal_int(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Literal(Literal::Int(i), _) => Some(*i),
        _ => None,
    }
}

/// Reads a task class's body (§3 attribute list) into a `TaskDefinition`,
/// applying the documented defaults, and captures the `run` method's
/// source range verbatim. `source` is the full project text `body_span`
/// offsets are taken from.
pub fn from_class_def(class: &ClassDef, source: &str) -> Result<TaskDefinition, Diagnostic> {
    let mut service = Service::Lambda;
    let mut timeout: u32 = 300;
    let mut cpu: u32 = 1024;
    let mut memory: u32 = 2048;
    let mut spec: Option<String> = None;
    let mut concurrency: u32 = 1;
    let mut heartbeat_interval: Option<u32> = None;
    let mut autoscaling_min: Option<u32> = None;
    let mut autoscaling_max: Option<u32> = None;
    let mut run_body: Option<String> = None;

    for member in &class.body {
        match member {
            ClassMember::Assign { name, value, .. } => match name.as_str() {
                "service" => {
                    let raw = literal_str(value).ok_or_else(|| {
                        attribute_error(format!("{}: service must be a string literal", class.name))
                    })?;
                    service = Service::from_str(raw).ok_or_else(|| {
                        attribute_error(format!(
                            "{}: unknown service '{}'",
                            class.name, raw
                        ))
                    })?;
                }
                "timeout" => {
                    timeout = literal_int(value).ok_or_else(|| {
                        attribute_error(format!("{}: timeout must be an integer", class.name))
                    })? as u32;
                }
                "cpu" => {
                    cpu = literal_int(value).ok_or_else(|| {
                        attribute_error(format!("{}: cpu must be an integer", class.name))
                    })? as u32;
                }
                "memory" => {
                    memory = literal_int(value).ok_or_else(|| {
                        attribute_error(format!("{}: memory must be an integer", class.name))
                    })? as u32;
                }
                "spec" => {
                    spec = Some(
                        literal_str(value)
                            .ok_or_else(|| {
                                attribute_error(format!("{}: spec must be a string", class.name))
                            })?
                            .to_string(),
                    );
                }
                "concurrency" => {
                    concurrency = literal_int(value).ok_or_else(|| {
                        attribute_error(format!("{}: concurrency must be an integer", class.name))
                    })? as u32;
                }
                "heartbeat_interval" => {
                    heartbeat_interval = Some(literal_int(value).ok_or_else(|| {
                        attribute_error(format!(
                            "{}: heartbeat_interval must be an integer",
                            class.name
                        ))
                    })? as u32);
                }
                "autoscaling_min" => {
                    autoscaling_min = Some(literal_int(value).ok_or_else(|| {
                        attribute_error(format!(
                            "{}: autoscaling_min must be an integer",
                            class.name
                        ))
                    })? as u32);
                }
                "autoscaling_max" => {
                    autoscaling_max = Some(literal_int(value).ok_or_else(|| {
                        attribute_error(format!(
                            "{}: autoscaling_max must be an integer",
                            class.name
                        ))
                    })? as u32);
                }
                _ => {}
            },
            ClassMember::Method(f) if f.name == "run" => {
                run_body = Some(source[f.body_span.start..f.body_span.end].to_string());
            }
            ClassMember::Method(_) => {}
        }
    }

    if service == Service::EcsWorker {
        run_body = None;
    }

    let task = TaskDefinition {
        name: class.name.clone(),
        service,
        timeout,
        cpu,
        memory,
        run_body,
        spec,
        concurrency,
        heartbeat_interval,
        autoscaling_min,
        autoscaling_max,
    };

    validate(&task)?;
    Ok(task)
}

/// Service-specific validation (§4.4). Returns the first violation as a
/// hard `AttributeError`/`ShapeError`-equivalent (the factory stops at the
/// first bad attribute rather than collecting all of them, matching §7's
/// "abandoned on the first hard error" policy applied at task-definition
/// granularity).
fn validate(task: &TaskDefinition) -> Result<(), Diagnostic> {
    match task.service {
        Service::Lambda | Service::LambdaPexpmRunner => {
            if !limits::is_valid_lambda_memory(task.memory) {
                return Err(attribute_error(format!(
                    "{}: memory {} is not a valid Lambda memory value",
                    task.name, task.memory
                )));
            }
        }
        Service::Ecs => {
            if !limits::is_valid_ecs_cpu_memory(task.cpu, task.memory) {
                return Err(attribute_error(format!(
                    "{}: cpu={} memory={} is not a valid ECS cpu/memory pair",
                    task.name, task.cpu, task.memory
                )));
            }
        }
        Service::EcsWorker => {
            if !limits::is_valid_ecs_cpu_memory(task.cpu, task.memory) {
                return Err(attribute_error(format!(
                    "{}: cpu={} memory={} is not a valid ECS cpu/memory pair",
                    task.name, task.cpu, task.memory
                )));
            }
            if task.spec.is_none() {
                return Err(attribute_error(format!(
                    "{}: ecs:worker requires 'spec'",
                    task.name
                )));
            }
            if !(1..=100).contains(&task.concurrency) {
                return Err(attribute_error(format!(
                    "{}: concurrency {} is out of range [1,100]",
                    task.name, task.concurrency
                )));
            }
            if let Some(h) = task.heartbeat_interval {
                if h >= task.timeout {
                    return Err(attribute_error(format!(
                        "{}: heartbeat_interval {} must be less than timeout {}",
                        task.name, h, task.timeout
                    )));
                }
            }
            if let (Some(min), Some(max)) = (task.autoscaling_min, task.autoscaling_max) {
                if min > max {
                    return Err(attribute_error(format!(
                        "{}: autoscaling_min {} must be <= autoscaling_max {}",
                        task.name, min, max
                    )));
                }
            }
        }
    }
    Ok(())
}
