//! XML formatting and minimal parsing for S3 responses

use awsbox_core::RequestId;

/// Format an S3 error response as XML
pub fn format_error(code: &str, message: &str, resource: &str) -> String {
    let resource_line = if !resource.is_empty() {
        format!("  <Resource>{}</Resource>\n", escape(resource))
    } else {
        String::new()
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>{}</Code>
  <Message>{}</Message>
{}  <RequestId>{}</RequestId>
</Error>"#,
        code,
        escape(message),
        resource_line,
        RequestId::new().as_str()
    )
}

/// Format ListBuckets response
pub fn format_list_buckets(owner: &str, buckets: &[String]) -> String {
    let bucket_entries: String = buckets
        .iter()
        .map(|name| {
            format!(
                "    <Bucket>\n      <Name>{}</Name>\n    </Bucket>",
                escape(name)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ListAllMyBucketsResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Owner>
    <ID>{}</ID>
    <DisplayName>awsbox</DisplayName>
  </Owner>
  <Buckets>
{}
  </Buckets>
</ListAllMyBucketsResult>"#,
        owner, bucket_entries
    )
}

/// Format ListObjectsV2 response
pub fn format_list_objects(bucket: &str, prefix: &str, entries: &[(String, String, usize)]) -> String {
    let contents: String = entries
        .iter()
        .map(|(key, etag, size)| {
            format!(
                "  <Contents>\n    <Key>{}</Key>\n    <ETag>&quot;{}&quot;</ETag>\n    <Size>{}</Size>\n  </Contents>",
                escape(key),
                etag,
                size
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>{}</Name>
  <Prefix>{}</Prefix>
  <KeyCount>{}</KeyCount>
  <IsTruncated>false</IsTruncated>
{}
</ListBucketResult>"#,
        escape(bucket),
        escape(prefix),
        entries.len(),
        contents
    )
}

/// Format CreateMultipartUpload response
pub fn format_initiate_multipart_upload(bucket: &str, key: &str, upload_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>{}</Bucket>
  <Key>{}</Key>
  <UploadId>{}</UploadId>
</InitiateMultipartUploadResult>"#,
        escape(bucket),
        escape(key),
        upload_id
    )
}

/// Format CompleteMultipartUpload response
pub fn format_complete_multipart_upload(
    location: &str,
    bucket: &str,
    key: &str,
    etag: &str,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Location>{}</Location>
  <Bucket>{}</Bucket>
  <Key>{}</Key>
  <ETag>&quot;{}&quot;</ETag>
</CompleteMultipartUploadResult>"#,
        escape(location),
        escape(bucket),
        escape(key),
        etag
    )
}

/// Format CopyObject response
pub fn format_copy_object(etag: &str, last_modified: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<CopyObjectResult>
  <LastModified>{}</LastModified>
  <ETag>&quot;{}&quot;</ETag>
</CopyObjectResult>"#,
        last_modified, etag
    )
}

/// Format GetObjectTagging response
pub fn format_tagging(tags: &[(String, String)]) -> String {
    let tag_entries: String = tags
        .iter()
        .map(|(k, v)| {
            format!(
                "    <Tag>\n      <Key>{}</Key>\n      <Value>{}</Value>\n    </Tag>",
                escape(k),
                escape(v)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Tagging xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <TagSet>
{}
  </TagSet>
</Tagging>"#,
        tag_entries
    )
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// === Minimal parsing ===

/// Extract the text of the first `<tag>` element.
pub fn get_value(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim().to_string())
}

/// Extract the bodies of every `<tag>` element, in order.
pub fn get_elements(body: &str, tag: &str) -> Vec<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut elements = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(&open) {
        let start = start + open.len();
        let Some(end) = rest[start..].find(&close) else {
            break;
        };
        elements.push(rest[start..start + end].to_string());
        rest = &rest[start + end + close.len()..];
    }
    elements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_xml_shape() {
        let xml = format_error("NoSuchBucket", "no bucket", "my-bucket");
        assert!(xml.contains("<Code>NoSuchBucket</Code>"));
        assert!(xml.contains("<Resource>my-bucket</Resource>"));
        assert!(xml.contains("<RequestId>"));
    }

    #[test]
    fn test_get_elements_parses_parts() {
        let body = r#"<CompleteMultipartUpload>
            <Part><PartNumber>2</PartNumber><ETag>"b"</ETag></Part>
            <Part><PartNumber>1</PartNumber><ETag>"a"</ETag></Part>
        </CompleteMultipartUpload>"#;

        let parts = get_elements(body, "Part");
        assert_eq!(parts.len(), 2);
        assert_eq!(get_value(&parts[0], "PartNumber").as_deref(), Some("2"));
        assert_eq!(get_value(&parts[1], "ETag").as_deref(), Some(r#""a""#));
    }

    #[test]
    fn test_escape() {
        let xml = format_error("InvalidArgument", "a < b & c", "");
        assert!(xml.contains("a &lt; b &amp; c"));
    }
}
