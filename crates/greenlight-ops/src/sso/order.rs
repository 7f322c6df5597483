//! Release ticket payload composition. The downstream's document format is
//! a fixed boilerplate detail list with one `application` entry carrying
//! both `children` (a list of single-element lists, one per service) and a
//! flat `account_data` mirror.

use anyhow::{bail, Result};
use serde_json::{json, Value};

use greenlight_core::db::now_str;

pub fn compose_order(
    project: &str,
    environment: &str,
    services: &[String],
    hashes: &[String],
    job_ids: &[String],
    approver_email: &str,
) -> Result<Value> {
    if services.len() != hashes.len() {
        bail!(
            "service count ({}) does not match hash count ({})",
            services.len(),
            hashes.len()
        );
    }
    if services.len() != job_ids.len() {
        bail!(
            "service count ({}) does not match job id count ({})",
            services.len(),
            job_ids.len()
        );
    }

    let mut children = Vec::with_capacity(services.len());
    let mut account_data = Vec::with_capacity(services.len());
    for ((service, hash), job_id) in services.iter().zip(hashes).zip(job_ids) {
        let item = json!({
            "project_name": project,
            "env": environment,
            "job_id": job_id,
            "name": service,
            "parameters": {
                "check_commitID": hash,
                "action_type": "gray",
                "gitBranch": "",
                "canRollback": "不支持",
                "rollback_ver": ""
            }
        });
        children.push(Value::Array(vec![item.clone()]));
        account_data.push(item);
    }

    let now = now_str();
    Ok(json!({
        "detail": [
            [
                {"status": "申请详情"},
                {"id": "projectName", "name": "项目名称", "value": project},
                {"id": "releaseType", "name": "发布类型", "value": "常规发布"},
                {"id": "category", "name": "依赖业务", "value": ""},
                {"id": "environment", "name": "上线环境", "value": "预发环境"},
                {"id": "releaseTime", "name": "上线时间", "value": now},
                {"id": "repository", "name": "仓库地址", "value": ""},
                {"id": "codeBranch", "name": "代码分支", "value": ""},
                {"id": "onlineVersion", "name": "上线版本", "value": "上线版本"},
                {"id": "onlineMD5", "name": "MD5", "value": "MD5"},
                {"id": "updateContent", "name": "更新内容", "value": "更新内容"},
                {"id": "sqlUpdate", "name": "SQL更新", "value": false},
                {"id": "configUpdate", "name": "配置文件更新", "value": false},
                {"id": "affectScope", "name": "影响范围", "value": "影响范围"},
                {"id": "rollbackInstructions", "name": "回滚说明", "value": ""},
                {"id": "releaseProcess", "name": "发布流程", "value": "发布流程"},
                {"id": "mainBusiness", "name": "是否主线业务", "value": false},
                {"id": "needTest", "name": "是否需要测试", "value": false},
                {"id": "upload", "name": "SQL脚本", "value": ""},
                {"id": "ifUploadJT", "name": "截图审批", "value": false},
                {"id": "sourceRemark", "name": "备注", "value": "备注"},
                {
                    "id": "application",
                    "name": "发布应用",
                    "children": children,
                    "account_data": account_data,
                    "job_status": true
                },
                {"id": "approver", "name": "审批人", "value": approver_email}
            ]
        ],
        "draftId": "",
        "endType": "0",
        "processStatus": "0",
        "publishVersion": "0",
        "title": format!("{project}预发发版"),
        "type": "dcAutoReleaseProcess",
        "userId": "10572"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn composes_one_order_entry_per_service() {
        let order = compose_order(
            "EBPAY",
            "UAT",
            &strings(&["svc-a", "svc-b"]),
            &strings(&["aaa", "bbb"]),
            &strings(&["j1", "j2"]),
            "boss@example.com",
        )
        .unwrap();

        assert_eq!(order["title"], "EBPAY预发发版");
        assert_eq!(order["type"], "dcAutoReleaseProcess");

        let application = order["detail"][0]
            .as_array()
            .unwrap()
            .iter()
            .find(|item| item["id"] == "application")
            .unwrap();
        let children = application["children"].as_array().unwrap();
        assert_eq!(children.len(), 2);
        // Each child is a single-element list.
        assert_eq!(children[0].as_array().unwrap().len(), 1);
        assert_eq!(children[0][0]["name"], "svc-a");
        assert_eq!(children[0][0]["parameters"]["check_commitID"], "aaa");
        assert_eq!(children[1][0]["job_id"], "j2");
        // Flat mirror matches the nested entries.
        let account = application["account_data"].as_array().unwrap();
        assert_eq!(account.len(), 2);
        assert_eq!(account[1]["name"], "svc-b");

        let approver = order["detail"][0]
            .as_array()
            .unwrap()
            .iter()
            .find(|item| item["id"] == "approver")
            .unwrap();
        assert_eq!(approver["value"], "boss@example.com");
    }

    #[test]
    fn count_mismatch_is_rejected() {
        assert!(compose_order(
            "EBPAY",
            "UAT",
            &strings(&["svc-a", "svc-b"]),
            &strings(&["only-one"]),
            &strings(&["j1", "j2"]),
            "",
        )
        .is_err());
        assert!(compose_order(
            "EBPAY",
            "UAT",
            &strings(&["svc-a"]),
            &strings(&["aaa"]),
            &strings(&[]),
            "",
        )
        .is_err());
    }
}
